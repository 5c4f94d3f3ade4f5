use crate::config::types::{Config, JobConfig, StoreConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_job_config(&config.job)?;
    validate_store_config(&config.store)?;
    Ok(())
}

/// Validates job configuration
fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
    validate_name(&config.name)?;

    if config.timeout_ms < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_ms must be >= 1ms, got {}ms",
            config.timeout_ms
        )));
    }

    if config.force_checkpoint_id.iter().any(|id| id.is_empty()) {
        return Err(ConfigError::Validation(
            "force_checkpoint_id cannot contain empty ids".to_string(),
        ));
    }

    validate_extension(&config.alternate_extension)?;

    if config.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    if let Some(path) = &config.checkpoint_file_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "checkpoint_file_path cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.lock_retries < 1 {
        return Err(ConfigError::Validation(
            "lock_retries must be >= 1".to_string(),
        ));
    }

    if config.lock_min_backoff_ms > config.lock_max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "lock_min_backoff_ms ({}) cannot exceed lock_max_backoff_ms ({})",
            config.lock_min_backoff_ms, config.lock_max_backoff_ms
        )));
    }

    if config.lock_stale_ms == 0 {
        return Err(ConfigError::Validation(
            "lock_stale_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Job names end up in file names: alphanumeric, '.', '_' and '-' only
fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation("name cannot be empty".to_string()));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::Validation(format!(
            "name must contain only alphanumeric characters, '.', '_' and '-', got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_extension(extension: &str) -> Result<(), ConfigError> {
    if extension.is_empty() {
        return Err(ConfigError::Validation(
            "alternate_extension cannot be empty".to_string(),
        ));
    }

    if extension.starts_with('.') || extension.contains('/') || extension.contains('\\') {
        return Err(ConfigError::Validation(format!(
            "alternate_extension must be a bare extension like 'md', got '{}'",
            extension
        )));
    }

    Ok(())
}
