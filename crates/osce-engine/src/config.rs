use osce_settings::{ClinicalMode, OsceSettings, RouterKind};

use crate::session_cache::CacheConfig;

/// Live nurse contexts are capped lower than patient ones.
pub const NURSE_MAX_SESSIONS: usize = 100;

/// The slice of [`OsceSettings`] the orchestrator needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    /// Bounds of the separate nurse-persona pool.
    pub nurse_cache: CacheConfig,
    pub router: RouterKind,
    pub clinical_mode: ClinicalMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            nurse_cache: nurse_bounds(&cache),
            cache,
            router: RouterKind::default(),
            clinical_mode: ClinicalMode::default(),
        }
    }
}

fn nurse_bounds(cache: &CacheConfig) -> CacheConfig {
    CacheConfig {
        max_sessions: NURSE_MAX_SESSIONS.min(cache.max_sessions),
        ..cache.clone()
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &OsceSettings) -> Self {
        let cache = CacheConfig {
            max_sessions: settings.session.max_sessions,
            ttl: settings.session.ttl.get(),
            sweep_interval: settings.session.sweep_interval.get(),
        };
        Self {
            nurse_cache: nurse_bounds(&cache),
            cache,
            router: settings.engine.router,
            clinical_mode: settings.engine.clinical_mode,
        }
    }
}
