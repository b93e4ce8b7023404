use serde::{Deserialize, Serialize};

use crate::duration::HumanDuration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OsceSettings {
    pub session: SessionSettings,
    pub generative: GenerativeSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

/// Bounds of the generative session cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub ttl: HumanDuration,
    pub sweep_interval: HumanDuration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            ttl: HumanDuration::from_secs(3600),
            sweep_interval: HumanDuration::from_secs(300),
        }
    }
}

/// Upstream endpoint and the shared limiter in front of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerativeSettings {
    /// `None` runs fully offline on the deterministic paths.
    pub base_url: Option<String>,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_concurrent: usize,
    pub min_spacing: HumanDuration,
    pub quota_per_minute: u32,
    pub request_timeout: HumanDuration,
}

impl Default for GenerativeSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.7,
            max_concurrent: 5,
            min_spacing: HumanDuration::from_millis(200),
            quota_per_minute: 60,
            request_timeout: HumanDuration::from_secs(20),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    /// Every message goes to the intent classifier.
    #[default]
    Clinical,
    /// Keyword scoring picks conversational, unclear or clinical first.
    Keyword,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClinicalMode {
    /// Permitted fact intents are answered with the canonical case text.
    #[default]
    Deterministic,
    /// Permitted fact intents are phrased by the generative persona, with the
    /// canonical text as the offline fallback.
    Grounded,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub router: RouterKind,
    pub clinical_mode: ClinicalMode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub audit: bool,
    pub audit_db_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            audit: true,
            audit_db_path: None,
        }
    }
}
