use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use osce_core::case::CaseKnowledge;
use osce_core::ids::CaseId;

use crate::error::StoreError;
use crate::traits::CaseStore;

/// Case documents stored as `<dir>/<case_id>.json`, parsed once and cached.
pub struct CaseLibrary {
    dir: PathBuf,
    loaded: RwLock<HashMap<CaseId, Arc<CaseKnowledge>>>,
}

impl CaseLibrary {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::Io(format!("case directory not found: {}", dir.display())));
        }
        Ok(Self {
            dir: dir.to_owned(),
            loaded: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, case_id: &CaseId) -> Option<PathBuf> {
        let id = case_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{id}.json")))
    }
}

impl CaseStore for CaseLibrary {
    #[instrument(skip(self), fields(case_id = %case_id))]
    fn load(&self, case_id: &CaseId) -> Result<Arc<CaseKnowledge>, StoreError> {
        if let Some(case) = self.loaded.read().get(case_id) {
            return Ok(case.clone());
        }

        let Some(path) = self.path_for(case_id) else {
            warn!("rejected malformed case id");
            return Err(StoreError::NotFound(format!("case {case_id}")));
        };
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("case {case_id}")));
            }
            Err(e) => return Err(e.into()),
        };

        let mut case: CaseKnowledge = serde_json::from_str(&raw)?;
        if case.case_metadata.case_id.is_empty() {
            case.case_metadata.case_id = case_id.as_str().to_owned();
        }
        debug!(path = %path.display(), "case loaded");

        let case = Arc::new(case);
        self.loaded.write().insert(case_id.clone(), case.clone());
        Ok(case)
    }

    fn list(&self) -> Result<Vec<CaseId>, StoreError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(CaseId::from_raw(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}
