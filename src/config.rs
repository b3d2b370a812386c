pub use config::{Config, ConfigError, Environment, File as ConfigFile};
pub use once_cell::sync::{Lazy, OnceCell};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
/// Environment overrides look like REWARDTOOLS__FIRESTORE__PROJECT_ID
pub const ENV_PREFIX: &str = "REWARDTOOLS";

static GLOBAL_CONFIG: OnceCell<Settings> = OnceCell::new();
static DEFAULT_SETTINGS: Lazy<Settings> = Lazy::new(Settings::default);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub firestore: FirestoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirestoreSettings {
    /// Falls back to the key file's project_id, then GOOGLE_CLOUD_PROJECT
    pub project_id: Option<String>,
    pub database_id: String,
    pub request_timeout_secs: u64,
}

impl Default for FirestoreSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            database_id: "(default)".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Load settings from an optional TOML file plus environment overrides.
pub fn load_settings(path: &str) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(ConfigFile::with_name(path).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()
}

pub fn init_global_config(path: &str) -> Result<(), ConfigError> {
    let settings = load_settings(path)?;
    GLOBAL_CONFIG
        .set(settings)
        .map_err(|_| ConfigError::Message("Config already set".to_string()))?;
    Ok(())
}

/// Global settings, or the defaults if `init_global_config` was never called.
pub fn get_global_config() -> &'static Settings {
    GLOBAL_CONFIG.get().unwrap_or(&DEFAULT_SETTINGS)
}
