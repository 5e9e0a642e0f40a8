use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "AUDIOSHELF_CONFIG";

/// `~/.audioshelf/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".audioshelf").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!("Unsupported config version: {}", config.version)));
    }

    if config.artifact_root.as_os_str().is_empty() {
        return Err(invalid("artifact_root must not be empty"));
    }
    // Paths land in handoff documents and book rows, which outlive the cwd.
    if !config.artifact_root.is_absolute() {
        return Err(invalid(format!(
            "artifact_root must be an absolute path, got '{}'",
            config.artifact_root.display()
        )));
    }
    if let Some(db) = config.database_path.as_ref().filter(|p| !p.is_absolute()) {
        return Err(invalid(format!(
            "database_path must be an absolute path, got '{}'",
            db.display()
        )));
    }

    let workers = &config.workers;
    for (name, value) in [
        ("workers.poll_interval_ms", workers.poll_interval_ms),
        ("workers.error_backoff_ms", workers.error_backoff_ms),
        ("workers.shutdown_timeout_ms", workers.shutdown_timeout_ms),
        ("provider.request_timeout_secs", config.provider.request_timeout_secs),
    ] {
        if value == 0 {
            return Err(invalid(format!("{} must be greater than 0", name)));
        }
    }

    if config.transcode.parallelism == 0 {
        return Err(invalid("transcode.parallelism must be greater than 0"));
    }

    if config.transcode.default_bitrate.trim().is_empty() {
        return Err(invalid("transcode.default_bitrate must not be empty"));
    }

    match reqwest::Url::parse(&config.provider.gateway_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            return Err(invalid(format!(
                "provider.gateway_url must be http(s), got '{}'",
                url.scheme()
            )))
        }
        Err(e) => return Err(invalid(format!("Invalid provider.gateway_url: {}", e))),
    }

    Ok(())
}
