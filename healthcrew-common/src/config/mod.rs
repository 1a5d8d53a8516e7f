//! Configuration system for HealthCrew.
//!
//! - Environment variable parsing with type safety and source tracking
//! - Effective settings assembled from `HEALTHCREW_*` variables
//! - Threshold overrides loaded from TOML

pub mod env;
pub mod settings;
pub mod source;
pub mod thresholds;

pub use env::{EnvError, EnvParser};
pub use settings::Settings;
pub use source::{ConfigSource, Sourced};
pub use thresholds::{ConfigError, ThresholdOverrides};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
