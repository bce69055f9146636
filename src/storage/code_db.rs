use rusqlite::{OptionalExtension, Result as SqlResult, params};

use super::database::Database;
use super::models::{GeneratedCode, millis_column, to_millis};
use crate::error::StorageError;

/// Write-once `friend_id -> code` table
pub struct CodeDatabase {
    db: Database,
}

impl CodeDatabase {
    pub fn new(db: Database) -> Result<Self, StorageError> {
        let code_db = Self { db };
        code_db.init_schema()?;
        Ok(code_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS codes (
                friend_id TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Returns false when a code was already stored for this friend.
    pub fn insert_code(&self, code: &GeneratedCode) -> Result<bool, StorageError> {
        let conn = self.db.connection();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO codes (friend_id, code, created_at) VALUES (?1, ?2, ?3)",
            params![code.friend_id, code.code, to_millis(code.created_at)],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_code(&self, friend_id: &str) -> Result<Option<GeneratedCode>, StorageError> {
        let conn = self.db.connection();
        let code = conn
            .query_row(
                "SELECT friend_id, code, created_at FROM codes WHERE friend_id = ?1",
                params![friend_id],
                |row| {
                    Ok(GeneratedCode {
                        friend_id: row.get(0)?,
                        code: row.get(1)?,
                        created_at: millis_column(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(code)
    }
}
