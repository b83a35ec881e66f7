//! Configuration management for menuledger using the prefer crate.
//!
//! Resolved once at startup into [`Settings`]; the database pool is built
//! from it and handed to services, nothing reads configuration mid-import.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::repository::diesel_pool::PoolOptions;
use crate::snapshot::DEFAULT_CURRENCY;

/// Environment variable that overrides the database location.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Explicit database URL; takes precedence over `data_dir`.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    pub pool_max_size: u32,
    /// Seconds to wait for a pooled connection.
    pub connection_timeout_secs: u64,
    /// Milliseconds a writer waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Per-snapshot import deadline in seconds (None = no deadline).
    pub import_timeout_secs: Option<u64>,
    /// Currency assumed for products that do not name one.
    pub default_currency: String,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("menuledger");

        Self {
            data_dir,
            database_filename: "menuledger.db".to_string(),
            database_url: None,
            pool_max_size: 10,
            connection_timeout_secs: 30,
            busy_timeout_ms: 5000,
            import_timeout_secs: None,
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// The URL the pool connects to.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.pool_max_size,
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn import_timeout(&self) -> Option<Duration> {
        self.import_timeout_secs.map(Duration::from_secs)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Full database URL.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub pool_max_size: Option<u32>,
    #[serde(default)]
    pub connection_timeout_secs: Option<u64>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    #[serde(default)]
    pub import_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_currency: Option<String>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers menuledger config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("menuledger").await {
            Ok(pref_config) => Config {
                target: pref_config.get("target").ok(),
                database: pref_config.get("database").ok(),
                database_url: pref_config.get("database_url").ok(),
                pool_max_size: pref_config.get("pool_max_size").ok(),
                connection_timeout_secs: pref_config.get("connection_timeout_secs").ok(),
                busy_timeout_ms: pref_config.get("busy_timeout_ms").ok(),
                import_timeout_secs: pref_config.get("import_timeout_secs").ok(),
                default_currency: pref_config.get("default_currency").ok(),
            },
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(shellexpand::tilde(url).into_owned());
        }
        if let Some(size) = self.pool_max_size {
            settings.pool_max_size = size.max(1);
        }
        if let Some(secs) = self.connection_timeout_secs {
            settings.connection_timeout_secs = secs;
        }
        if let Some(ms) = self.busy_timeout_ms {
            settings.busy_timeout_ms = ms;
        }
        if let Some(secs) = self.import_timeout_secs {
            settings.import_timeout_secs = Some(secs);
        }
        if let Some(ref currency) = self.default_currency {
            settings.default_currency = currency.trim().to_uppercase();
        }
    }
}

/// Load settings: config file, then `.env`, then `DATABASE_URL`.
pub async fn load_settings() -> Settings {
    let _ = dotenvy::dotenv();

    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);

    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        if !url.trim().is_empty() {
            settings.database_url = Some(url);
        }
    }
    settings
}
