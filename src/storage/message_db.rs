use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Result as SqlResult, Row, params, params_from_iter};

use super::database::Database;
use super::models::{json_column, millis_column, to_millis};
use crate::common::Message;
use crate::error::StorageError;

const MESSAGE_COLUMNS: &str = "id, from_friend_id, to_friend_id, timestamp, body";

/// Range filter for ordered message scans. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MessageFilter {
    /// One direction of a conversation.
    pub fn between(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            ..Self::default()
        }
    }
}

/// Append-only message log
pub struct MessageDatabase {
    db: Database,
}

impl MessageDatabase {
    pub fn new(db: Database) -> Result<Self, StorageError> {
        let message_db = Self { db };
        message_db.init_schema()?;
        Ok(message_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                from_friend_id TEXT NOT NULL,
                to_friend_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )?;

        // Conversation history is the common query shape.
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair_timestamp
             ON messages(from_friend_id, to_friend_id, timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp DESC)",
            [],
        )?;

        Ok(())
    }

    pub fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO messages (id, from_friend_id, to_friend_id, timestamp, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.from_friend_id,
                message.to_friend_id,
                to_millis(message.timestamp),
                serde_json::to_string(&message.body)?,
            ],
        )?;
        Ok(())
    }

    /// Messages matching `filter`, newest first. Equal timestamps come back in
    /// reverse insertion order.
    pub fn query_ordered(&self, filter: &MessageFilter) -> Result<Vec<Message>, StorageError> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(from) = &filter.from {
            values.push(Value::Text(from.clone()));
            clauses.push(format!("from_friend_id = ?{}", values.len()));
        }
        if let Some(to) = &filter.to {
            values.push(Value::Text(to.clone()));
            clauses.push(format!("to_friend_id = ?{}", values.len()));
        }
        if let Some(since) = filter.since {
            values.push(Value::Integer(to_millis(since)));
            clauses.push(format!("timestamp >= ?{}", values.len()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        // SQLite treats a negative LIMIT as "no limit".
        let limit = filter.limit.map(|limit| limit as i64).unwrap_or(-1);
        values.push(Value::Integer(limit));

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages {where_clause}
             ORDER BY timestamp DESC, seq DESC
             LIMIT ?{}",
            values.len()
        );

        let conn = self.db.connection();
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(values), message_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(messages)
    }

    /// Every message, in no particular order.
    pub fn get_all(&self) -> Result<Vec<Message>, StorageError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages"))?;
        let messages = stmt
            .query_map([], message_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.db.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn message_from_row(row: &Row<'_>) -> SqlResult<Message> {
    Ok(Message {
        id: row.get(0)?,
        from_friend_id: row.get(1)?,
        to_friend_id: row.get(2)?,
        timestamp: millis_column(row, 3)?,
        body: json_column(row, 4)?,
    })
}
