//! Process-wide configuration, set once before the first container is created.

use std::sync::OnceLock;
use std::time::Duration;

/// Process-wide flags. Set once via [`configure`] before the first `New`;
/// later calls are ignored, mirroring the coordinator's init-once contract.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Upper bound on concurrent CLI-backend container creations.
    pub max_concurrent: usize,
    /// Pacing delay between coordinator acquisition probes.
    pub create_delay: Duration,
    /// Skip container removal on cleanup; log the id instead.
    pub keep: bool,
    /// Enable verbose lifecycle logging.
    pub verbose: bool,
    /// Runtime binary name for the CLI backend (`docker`, `podman`, ...).
    pub runtime: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent: 32,
            create_delay: Duration::from_millis(50),
            keep: false,
            verbose: false,
            runtime: "docker".to_string(),
        }
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Install process-wide settings. Returns `Err(settings)` if settings were
/// already configured (explicitly or implicitly via [`current`]).
pub fn configure(settings: Settings) -> std::result::Result<(), Settings> {
    crate::coordinator::init(settings.max_concurrent, settings.create_delay);
    SETTINGS.set(settings)
}

/// The active settings, defaulted on first access if [`configure`] was
/// never called.
pub fn current() -> &'static Settings {
    SETTINGS.get_or_init(Settings::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!(s.max_concurrent > 0);
        assert!(!s.keep);
        assert_eq!(s.runtime, "docker");
    }
}
