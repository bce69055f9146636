use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::MidnightPolicy;
use crate::presence::allocator::{AllocationStrategy, DEFAULT_PALETTE};

pub const DEFAULT_CONFIG_PATH: &str = "config/friend_ping.json";
pub const DEFAULT_DB_PATH: &str = "data/friend_ping.db";
/// Overrides `database_path` when set (also read from `.env`).
pub const DB_PATH_ENV: &str = "FRIEND_PING_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub palette: Vec<String>,
    pub allocation: AllocationStrategy,
    pub stale_after_secs: u64,
    /// `0` sweeps as fast as the runtime allows (one millisecond).
    pub sweep_interval_secs: u64,
    /// Maximum undrained signals per friend; unbounded when absent.
    pub queue_capacity: Option<usize>,
    pub midnight_policy: MidnightPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DB_PATH.to_string(),
            palette: DEFAULT_PALETTE.iter().map(|color| color.to_string()).collect(),
            allocation: AllocationStrategy::default(),
            stale_after_secs: 150,
            sweep_interval_secs: 30,
            queue_capacity: None,
            midnight_policy: MidnightPolicy::default(),
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };

    if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
        if !db_path.trim().is_empty() {
            log::info!("Using database {db_path} from {DB_PATH_ENV}");
            config.database_path = db_path;
        }
    }

    if config.palette.is_empty() {
        log::warn!("Config palette is empty; every friend creation will fail");
    }

    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
