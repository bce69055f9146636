use chrono::{DateTime, Utc};
use rusqlite::{TransactionBehavior, params};

use super::database::Database;
use super::friend_db::{friend_exists, init_schema, load_queue};
use super::models::to_millis;
use crate::common::Signal;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { seq: i64, depth: usize },
    UnknownFriend,
    Full { depth: usize },
}

/// Writer side of the per-friend signal queues. Nothing else inserts into or
/// deletes from `signals` (apart from the cascade when a friend is purged).
pub struct SignalDatabase {
    db: Database,
}

impl SignalDatabase {
    pub fn new(db: Database) -> Result<Self, StorageError> {
        init_schema(&db.connection())?;
        Ok(Self { db })
    }

    /// Append `signal` behind whatever is already queued for `friend_id`.
    pub fn enqueue(
        &self,
        friend_id: &str,
        signal: &Signal,
        at: DateTime<Utc>,
        capacity: Option<usize>,
    ) -> Result<EnqueueOutcome, StorageError> {
        let mut conn = self.db.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !friend_exists(&tx, friend_id)? {
            return Ok(EnqueueOutcome::UnknownFriend);
        }

        let depth: i64 = tx.query_row(
            "SELECT COUNT(*) FROM signals WHERE friend_id = ?1",
            params![friend_id],
            |row| row.get(0),
        )?;
        let depth = depth as usize;
        if capacity.is_some_and(|cap| depth >= cap) {
            return Ok(EnqueueOutcome::Full { depth });
        }

        tx.execute(
            "INSERT INTO signals (friend_id, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![friend_id, serde_json::to_string(signal)?, to_millis(at)],
        )?;
        let seq = tx.last_insert_rowid();
        tx.commit()?;

        Ok(EnqueueOutcome::Queued {
            seq,
            depth: depth + 1,
        })
    }

    /// Pending signals in arrival order, `None` if the friend does not exist.
    pub fn pending(&self, friend_id: &str) -> Result<Option<Vec<Signal>>, StorageError> {
        let conn = self.db.connection();
        if !friend_exists(&conn, friend_id)? {
            return Ok(None);
        }
        Ok(Some(load_queue(&conn, friend_id)?))
    }

    /// Hand every pending signal to the consumer and clear the queue.
    pub fn drain(&self, friend_id: &str) -> Result<Option<Vec<Signal>>, StorageError> {
        let mut conn = self.db.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !friend_exists(&tx, friend_id)? {
            return Ok(None);
        }

        let queue = load_queue(&tx, friend_id)?;
        tx.execute("DELETE FROM signals WHERE friend_id = ?1", params![friend_id])?;
        tx.commit()?;

        Ok(Some(queue))
    }
}
