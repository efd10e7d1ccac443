//! Environment-driven configuration.
//!
//! The CRM API base URL and bearer token come from the environment; a
//! missing credential is a typed error whose text surfaces verbatim in the
//! collector's `ok:false` report so operators see exactly what is unset.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("KEYCRM_API_URL is not set")]
    MissingApiUrl,
    #[error("KEYCRM_API_KEY is not set")]
    MissingApiKey,
}

/// CRM API credentials.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    /// Base URL, e.g. `https://openapi.keycrm.app/v1`.
    pub api_url: String,
    /// Bearer token.
    pub api_key: String,
}

impl CrmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = non_empty_env("KEYCRM_API_URL").ok_or(ConfigError::MissingApiUrl)?;
        let api_key = non_empty_env("KEYCRM_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Path of the snapshot database: `CAMPAIGN_EXP_DB` override, otherwise
/// `~/.campaign-exp/snapshots.db`.
pub fn snapshot_db_path() -> PathBuf {
    if let Some(path) = non_empty_env("CAMPAIGN_EXP_DB") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_default()
        .join(".campaign-exp")
        .join("snapshots.db")
}
