pub mod code_db;
pub mod database;
pub mod friend_db;
pub mod message_db;
pub mod models;
pub mod signal_db;

pub use code_db::CodeDatabase;
pub use database::Database;
pub use friend_db::{CreateOutcome, FriendDatabase};
pub use message_db::{MessageDatabase, MessageFilter};
pub use signal_db::{EnqueueOutcome, SignalDatabase};

use std::fs;
use std::path::Path;

/// Ensure the directory holding the database file exists
pub fn ensure_data_dir(db_path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
