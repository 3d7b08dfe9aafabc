/// Runtime configuration, sourced entirely from environment variables.
use crate::error::IndexerError;
use once_cell::sync::OnceCell;
use serde::Deserialize;

static GLOBAL_SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub rpc_url: String,
    pub database_url: String,

    #[serde(default = "default_db_max_conns")]
    pub db_max_conns: u32,

    #[serde(default = "default_backfill_concurrency")]
    pub backfill_concurrency: usize,
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: u64,

    #[serde(default = "default_backfill_start_height")]
    pub backfill_start_height: u64,
    /// `None` means "fill up to the chain tip", resolved at startup.
    #[serde(default)]
    pub backfill_end_height: Option<u64>,

    #[serde(default = "default_livetail_interval_ms")]
    pub livetail_interval_ms: u64,

    #[serde(default = "default_reorg_max_depth")]
    pub reorg_max_depth: u64,

    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u32,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_db_max_conns() -> u32 {
    20
}
fn default_backfill_concurrency() -> usize {
    8
}
fn default_backfill_batch_size() -> u64 {
    100
}
fn default_backfill_start_height() -> u64 {
    0
}
fn default_livetail_interval_ms() -> u64 {
    2_000
}
fn default_reorg_max_depth() -> u64 {
    6
}
fn default_rpc_max_retries() -> u32 {
    5
}
fn default_rpc_timeout_ms() -> u64 {
    30_000
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_api_port() -> u16 {
    8080
}
fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Settings {
    /// Build settings from the process environment. `RPC_URL` and
    /// `DATABASE_URL` are required; everything else falls back to the
    /// defaults above.
    pub fn from_env() -> Result<Self, IndexerError> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()
            .map_err(|e| IndexerError::Config(e.to_string()))?;

        let settings = cfg
            .try_deserialize::<Settings>()
            .map_err(|e| IndexerError::Config(format!("missing or invalid configuration: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject configuration that no component should ever be started with.
    /// Currently just the backfill range tie-break: `start > end` is
    /// rejected outright rather than silently clamped or reinterpreted.
    fn validate(&self) -> Result<(), IndexerError> {
        if let Some(end) = self.backfill_end_height {
            if self.backfill_start_height > end {
                return Err(IndexerError::Config(format!(
                    "backfill_start_height ({}) must not exceed backfill_end_height ({})",
                    self.backfill_start_height, end
                )));
            }
        }
        Ok(())
    }
}

pub fn init_global_settings(settings: Settings) -> Result<(), IndexerError> {
    GLOBAL_SETTINGS
        .set(settings)
        .map_err(|_| IndexerError::Config("settings already initialized".into()))
}

pub fn get_global_settings() -> &'static Settings {
    GLOBAL_SETTINGS
        .get()
        .expect("init_global_settings must run before get_global_settings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert_eq!(default_backfill_concurrency(), 8);
        assert_eq!(default_reorg_max_depth(), 6);
        assert_eq!(default_db_max_conns(), 20);
        assert_eq!(default_rpc_timeout_ms(), 30_000);
        assert_eq!(default_metrics_port(), 9090);
    }

    #[test]
    fn missing_required_vars_is_config_error() {
        std::env::remove_var("RPC_URL");
        std::env::remove_var("DATABASE_URL");
        let result = Settings::from_env();
        assert!(result.is_err());
    }

    fn base_settings() -> Settings {
        Settings {
            rpc_url: "http://localhost:8545".into(),
            database_url: "postgres://localhost/test".into(),
            db_max_conns: default_db_max_conns(),
            backfill_concurrency: default_backfill_concurrency(),
            backfill_batch_size: default_backfill_batch_size(),
            backfill_start_height: default_backfill_start_height(),
            backfill_end_height: None,
            livetail_interval_ms: default_livetail_interval_ms(),
            reorg_max_depth: default_reorg_max_depth(),
            rpc_max_retries: default_rpc_max_retries(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            metrics_port: default_metrics_port(),
            api_port: default_api_port(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }

    #[test]
    fn backfill_start_past_end_is_rejected() {
        let mut settings = base_settings();
        settings.backfill_start_height = 100;
        settings.backfill_end_height = Some(50);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn backfill_start_at_or_before_end_is_accepted() {
        let mut settings = base_settings();
        settings.backfill_start_height = 10;
        settings.backfill_end_height = Some(10);
        assert!(settings.validate().is_ok());

        settings.backfill_end_height = Some(20);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn unset_end_height_is_always_accepted() {
        let settings = base_settings();
        assert!(settings.validate().is_ok());
    }
}
