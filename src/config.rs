use std::time::Duration;

use crate::util::env::{env_flag, env_opt, env_parse};

pub const DEFAULT_BUNGIE_BASE_URL: &str = "https://www.bungie.net/Platform";
pub const DEFAULT_HALO5_BASE_URL: &str = "https://www.haloapi.com";
pub const DEFAULT_INACTIVITY_CEILING: i32 = 128;

/// Runtime settings for both game clients and the store.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub bungie_api_key: Option<String>,
    pub bungie_base_url: String,
    pub halo5_api_key: Option<String>,
    pub halo5_base_url: String,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub inactivity_ceiling: i32,
    /// Schema version stamped on Destiny games.
    pub app_version: i32,
    /// Schema version stamped on Halo 5 profiles; a mismatch forces a season re-pull.
    pub halo_version: i32,
    pub db_max_connections: u32,
    pub auto_migrate: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bungie_api_key: None,
            bungie_base_url: DEFAULT_BUNGIE_BASE_URL.to_string(),
            halo5_api_key: None,
            halo5_base_url: DEFAULT_HALO5_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(15),
            user_agent: "gamestats-ingest/0.1".to_string(),
            inactivity_ceiling: DEFAULT_INACTIVITY_CEILING,
            app_version: 1,
            halo_version: 1,
            db_max_connections: 10,
            auto_migrate: false,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bungie_api_key: env_opt("BUNGIE_API_KEY"),
            bungie_base_url: env_opt("BUNGIE_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.bungie_base_url),
            halo5_api_key: env_opt("HALO5_API_KEY"),
            halo5_base_url: env_opt("HALO5_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.halo5_base_url),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 15u64).max(1)),
            user_agent: env_opt("HTTP_USER_AGENT").unwrap_or(defaults.user_agent),
            inactivity_ceiling: env_parse("INACTIVITY_CEILING", DEFAULT_INACTIVITY_CEILING).max(1),
            app_version: env_parse("APP_VERSION", 1),
            halo_version: env_parse("HALO_VERSION", 1),
            db_max_connections: env_parse("DB_MAX_CONNS", 10u32).max(1),
            auto_migrate: env_flag("AUTO_MIGRATE", false),
        }
    }
}
