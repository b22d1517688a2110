//! Configuration validation.

use switcher_ipc::SwitcherConfig;

use crate::error::ConfigError;

/// Check a configuration before anything is built from it.
pub fn validate(config: &SwitcherConfig) -> Result<(), ConfigError> {
    if config.file_path.as_os_str().is_empty() {
        return Err(ConfigError::EmptyFilePath);
    }
    if config.switch_interval.is_zero() {
        return Err(ConfigError::ZeroInterval);
    }
    if !config.file_path.exists() {
        return Err(ConfigError::FileNotFound(config.file_path.clone()));
    }
    Ok(())
}
