use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::env_vars::{env_override, mb_to_bytes};
use crate::constants::{
    DEFAULT_API_HOST, DEFAULT_API_SCHEME, DEFAULT_API_TIMEOUT_SECS, DEFAULT_MAX_PART_SIZE,
    DEFAULT_MULTIPART_STEP, DEFAULT_PARALLEL_UPLOADS, DEFAULT_STALL_THRESHOLD,
    DEFAULT_STALL_TIMEOUT_SECS, ENV_API_HOST, ENV_MAX_ATTEMPTS, ENV_MAX_PART_SIZE_MB,
    ENV_PARALLEL_UPLOADS, ENV_STALL_TIMEOUT_SECS, ENV_TOKEN, MAX_UPLOAD_ATTEMPTS,
    RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS, S3_MIN_PART_SIZE, SPOOL_COPY_BUFFER_SIZE,
};
use crate::upload::retry::RetryPolicy;
use crate::upload::stall::StallSettings;

/// Tunables of one upload engine.
///
/// Sizes are in bytes and durations in milliseconds so that tests can shrink
/// them; the YAML file and environment overrides use the same units except
/// where the variable name says otherwise.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Parts in flight at the same time
    pub parallel_uploads: usize,
    /// Upper bound of one cloud part
    pub max_part_size: u64,
    /// Cloud part size grows by this much per part number
    pub multipart_step: u64,
    /// Provider minimum for non-final cloud parts
    pub min_part_size: u64,
    pub stall_timeout_ms: u64,
    pub stall_threshold: u64,
    /// Attempts per part, first try included
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub copy_buffer_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            parallel_uploads: DEFAULT_PARALLEL_UPLOADS,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            multipart_step: DEFAULT_MULTIPART_STEP,
            min_part_size: S3_MIN_PART_SIZE,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_SECS * 1000,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            max_attempts: MAX_UPLOAD_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: RETRY_MAX_DELAY_SECS * 1000,
            copy_buffer_size: SPOOL_COPY_BUFFER_SIZE,
        }
    }
}

impl UploadConfig {
    /// Size of cloud multipart part `part_number` (1-based).
    ///
    /// Grows linearly with the part number, capped at `max_part_size`, and
    /// never below the provider minimum.
    pub fn multipart_part_size(&self, part_number: u32) -> u64 {
        let grown = self.multipart_step.saturating_mul(part_number as u64);
        grown.min(self.max_part_size).max(self.min_part_size)
    }

    pub fn stall_settings(&self) -> StallSettings {
        StallSettings {
            timeout: Duration::from_millis(self.stall_timeout_ms),
            threshold: self.stall_threshold,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.parallel_uploads == 0 {
            return Err(anyhow!("parallel_uploads must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be at least 1"));
        }
        if self.max_part_size < self.min_part_size {
            return Err(anyhow!(
                "max_part_size ({}) is below min_part_size ({})",
                self.max_part_size,
                self.min_part_size
            ));
        }
        if self.stall_timeout_ms == 0 {
            return Err(anyhow!("stall_timeout_ms must be positive"));
        }
        if self.copy_buffer_size == 0 {
            return Err(anyhow!("copy_buffer_size must be positive"));
        }
        Ok(())
    }

    /// Apply `RESTUPLOAD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(parallel) = env_override::<usize>(ENV_PARALLEL_UPLOADS)? {
            self.parallel_uploads = parallel;
        }
        if let Some(mb) = env_override::<u64>(ENV_MAX_PART_SIZE_MB)? {
            self.max_part_size = mb_to_bytes(mb);
        }
        if let Some(secs) = env_override::<u64>(ENV_STALL_TIMEOUT_SECS)? {
            self.stall_timeout_ms = secs * 1000;
        }
        if let Some(attempts) = env_override::<u32>(ENV_MAX_ATTEMPTS)? {
            self.max_attempts = attempts;
        }
        Ok(())
    }
}

/// Where and how to reach the origin REST service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub scheme: String,
    pub host: String,
    /// Bearer token sent with every API call
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_API_SCHEME.to_string(),
            host: DEFAULT_API_HOST.to_string(),
            token: None,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

impl ApiConfig {
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = env_override::<String>(ENV_API_HOST)? {
            self.host = host;
        }
        if let Some(token) = env_override::<String>(ENV_TOKEN)? {
            self.token = Some(token);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete configuration file of the `restupload` tool.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Apply environment overrides to both sections
    pub fn process_environment_variables(&mut self) -> Result<()> {
        self.api.apply_env_overrides()?;
        self.upload.apply_env_overrides()?;
        Ok(())
    }
}

/// Load the configuration file if given, otherwise defaults, then apply the
/// environment and validate.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => AppConfig::from_yaml_file(path)?,
        None => {
            debug!("No config path provided, using default configuration");
            AppConfig::default()
        }
    };
    config.process_environment_variables()?;
    config.upload.validate()?;
    Ok(config)
}
