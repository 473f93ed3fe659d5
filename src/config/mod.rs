mod env_vars;
mod upload_config;

// Re-export configuration types
pub use upload_config::{load_config, ApiConfig, AppConfig, UploadConfig};

// Re-export environment helpers
pub use env_vars::{env_override, mb_to_bytes};
