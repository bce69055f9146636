use std::collections::{HashMap, HashSet};
use std::os::raw::c_int;

use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row, TransactionBehavior,
    ffi, params,
};

use super::database::Database;
use super::models::{PurgedFriend, json_column, millis_column, to_millis};
use crate::common::{Color, Friend, Signal, TimeoutWindow};
use crate::error::StorageError;

const FRIEND_COLUMNS: &str =
    "friend_id, group_id, color, timeout_start, timeout_end, last_ping, tile_ids";

/// Result of an attempt to insert a new friend.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Friend),
    /// `friend_id` is already taken, either seen by the pre-check or reported
    /// by the primary key.
    DuplicateId,
    /// The color picker had nothing left to offer.
    PaletteExhausted,
    /// The `(group_id, color)` constraint rejected the picked color.
    ColorTaken(Color),
}

/// Friend documents: the `friends` table plus the `signals` rows that make up
/// each friend's queue.
pub struct FriendDatabase {
    db: Database,
}

impl FriendDatabase {
    pub fn new(db: Database) -> Result<Self, StorageError> {
        init_schema(&db.connection())?;
        Ok(Self { db })
    }

    /// Insert a friend whose color is picked from the group's free colors.
    ///
    /// The read of reserved colors and the insert share one IMMEDIATE
    /// transaction, so no other writer can slip in between them.
    pub fn create_friend<F>(
        &self,
        friend_id: &str,
        group_id: &str,
        now: DateTime<Utc>,
        pick: F,
    ) -> Result<CreateOutcome, StorageError>
    where
        F: FnOnce(&HashSet<Color>) -> Option<Color>,
    {
        let mut conn = self.db.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if friend_exists(&tx, friend_id)? {
            return Ok(CreateOutcome::DuplicateId);
        }

        let reserved = colors_in_group(&tx, group_id)?;
        let Some(color) = pick(&reserved) else {
            return Ok(CreateOutcome::PaletteExhausted);
        };

        let friend = Friend {
            friend_id: friend_id.to_string(),
            group_id: group_id.to_string(),
            color,
            timeout: TimeoutWindow::default(),
            last_ping: now,
            queue: Vec::new(),
            tile_ids: serde_json::Value::Null,
        };

        let inserted = tx.execute(
            "INSERT INTO friends (friend_id, group_id, color, timeout_start, timeout_end, last_ping, tile_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                friend.friend_id,
                friend.group_id,
                friend.color,
                friend.timeout.start,
                friend.timeout.end,
                to_millis(friend.last_ping),
                serde_json::to_string(&friend.tile_ids)?,
            ],
        );

        if let Err(err) = inserted {
            return match constraint_code(&err) {
                Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => Ok(CreateOutcome::DuplicateId),
                Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => Ok(CreateOutcome::ColorTaken(friend.color)),
                _ => Err(err.into()),
            };
        }

        tx.commit()?;
        Ok(CreateOutcome::Created(friend))
    }

    pub fn get_friend(&self, friend_id: &str) -> Result<Option<Friend>, StorageError> {
        let conn = self.db.connection();
        let friend = conn
            .query_row(
                &format!("SELECT {FRIEND_COLUMNS} FROM friends WHERE friend_id = ?1"),
                params![friend_id],
                friend_from_row,
            )
            .optional()?;

        match friend {
            Some(mut friend) => {
                friend.queue = load_queue(&conn, &friend.friend_id)?;
                Ok(Some(friend))
            }
            None => Ok(None),
        }
    }

    pub fn get_all_friends(&self) -> Result<Vec<Friend>, StorageError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!("SELECT {FRIEND_COLUMNS} FROM friends"))?;
        let friends = stmt
            .query_map([], friend_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        with_queues(&conn, friends, None)
    }

    pub fn get_friends_in_group(&self, group_id: &str) -> Result<Vec<Friend>, StorageError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FRIEND_COLUMNS} FROM friends WHERE group_id = ?1"
        ))?;
        let friends = stmt
            .query_map(params![group_id], friend_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        with_queues(&conn, friends, Some(group_id))
    }

    pub fn colors_in_group(&self, group_id: &str) -> Result<HashSet<Color>, StorageError> {
        Ok(colors_in_group(&self.db.connection(), group_id)?)
    }

    /// Store new tiles and refresh `last_ping`. Returns false when no friend matched.
    pub fn record_ping(
        &self,
        friend_id: &str,
        tile_ids: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let conn = self.db.connection();
        let updated = conn.execute(
            "UPDATE friends SET tile_ids = ?1, last_ping = ?2 WHERE friend_id = ?3",
            params![serde_json::to_string(tile_ids)?, to_millis(at), friend_id],
        )?;
        Ok(updated > 0)
    }

    pub fn update_last_ping(&self, friend_id: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let conn = self.db.connection();
        let updated = conn.execute(
            "UPDATE friends SET last_ping = ?1 WHERE friend_id = ?2",
            params![to_millis(at), friend_id],
        )?;
        Ok(updated > 0)
    }

    pub fn set_timeout(&self, friend_id: &str, window: &TimeoutWindow) -> Result<bool, StorageError> {
        let conn = self.db.connection();
        let updated = conn.execute(
            "UPDATE friends SET timeout_start = ?1, timeout_end = ?2 WHERE friend_id = ?3",
            params![window.start, window.end, friend_id],
        )?;
        Ok(updated > 0)
    }

    pub fn get_timeout(&self, friend_id: &str) -> Result<Option<TimeoutWindow>, StorageError> {
        let conn = self.db.connection();
        let window = conn
            .query_row(
                "SELECT timeout_start, timeout_end FROM friends WHERE friend_id = ?1",
                params![friend_id],
                |row| Ok(TimeoutWindow::new(row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(window)
    }

    /// Friends whose last ping is strictly older than `cutoff`.
    pub fn stale_friends(&self, cutoff: DateTime<Utc>) -> Result<Vec<PurgedFriend>, StorageError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT friend_id, group_id, color, last_ping
             FROM friends
             WHERE last_ping < ?1
             ORDER BY group_id, last_ping",
        )?;
        let stale = stmt
            .query_map(params![to_millis(cutoff)], purged_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(stale)
    }

    /// Delete the friend only if it is still stale; its signals go with it.
    pub fn purge_if_stale(
        &self,
        friend_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<PurgedFriend>, StorageError> {
        let conn = self.db.connection();
        let purged = conn
            .query_row(
                "DELETE FROM friends
                 WHERE friend_id = ?1 AND last_ping < ?2
                 RETURNING friend_id, group_id, color, last_ping",
                params![friend_id, to_millis(cutoff)],
                purged_from_row,
            )
            .optional()?;
        Ok(purged)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.db.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM friends", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Schema for friend documents, shared with [`super::SignalDatabase`].
pub(crate) fn init_schema(conn: &Connection) -> SqlResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS friends (
            friend_id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            color TEXT NOT NULL,
            timeout_start TEXT NOT NULL DEFAULT '00:00',
            timeout_end TEXT NOT NULL DEFAULT '23:59',
            last_ping INTEGER NOT NULL,
            tile_ids TEXT NOT NULL DEFAULT 'null',
            UNIQUE (group_id, color)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS signals (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            friend_id TEXT NOT NULL REFERENCES friends(friend_id) ON DELETE CASCADE,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_friends_last_ping ON friends(last_ping)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_signals_friend_seq ON signals(friend_id, seq)",
        [],
    )?;

    Ok(())
}

pub(crate) fn friend_exists(conn: &Connection, friend_id: &str) -> SqlResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM friends WHERE friend_id = ?1",
            params![friend_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn load_queue(conn: &Connection, friend_id: &str) -> SqlResult<Vec<Signal>> {
    let mut stmt =
        conn.prepare_cached("SELECT payload FROM signals WHERE friend_id = ?1 ORDER BY seq ASC")?;
    let queue = stmt
        .query_map(params![friend_id], |row| json_column::<Signal>(row, 0))?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(queue)
}

fn colors_in_group(conn: &Connection, group_id: &str) -> SqlResult<HashSet<Color>> {
    let mut stmt = conn.prepare_cached("SELECT color FROM friends WHERE group_id = ?1")?;
    let colors = stmt
        .query_map(params![group_id], |row| row.get::<_, Color>(0))?
        .collect::<SqlResult<HashSet<_>>>()?;
    Ok(colors)
}

/// Attach queues with a single scan of `signals`, restricted to `group_id` when given.
fn with_queues(
    conn: &Connection,
    mut friends: Vec<Friend>,
    group_id: Option<&str>,
) -> Result<Vec<Friend>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT s.friend_id, s.payload
         FROM signals s
         JOIN friends f ON f.friend_id = s.friend_id
         WHERE ?1 IS NULL OR f.group_id = ?1
         ORDER BY s.seq ASC",
    )?;
    let rows = stmt.query_map(params![group_id], |row| {
        Ok((row.get::<_, String>(0)?, json_column::<Signal>(row, 1)?))
    })?;

    let mut queues: HashMap<String, Vec<Signal>> = HashMap::new();
    for row in rows {
        let (friend_id, signal) = row?;
        queues.entry(friend_id).or_default().push(signal);
    }

    for friend in &mut friends {
        friend.queue = queues.remove(&friend.friend_id).unwrap_or_default();
    }
    Ok(friends)
}

fn friend_from_row(row: &Row<'_>) -> SqlResult<Friend> {
    Ok(Friend {
        friend_id: row.get(0)?,
        group_id: row.get(1)?,
        color: row.get(2)?,
        timeout: TimeoutWindow::new(row.get(3)?, row.get(4)?),
        last_ping: millis_column(row, 5)?,
        queue: Vec::new(),
        tile_ids: json_column(row, 6)?,
    })
}

fn purged_from_row(row: &Row<'_>) -> SqlResult<PurgedFriend> {
    Ok(PurgedFriend {
        friend_id: row.get(0)?,
        group_id: row.get(1)?,
        color: row.get(2)?,
        last_ping: millis_column(row, 3)?,
    })
}

/// Extended SQLite result code of a constraint violation, if that is what `err` is.
pub(crate) fn constraint_code(err: &rusqlite::Error) -> Option<c_int> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Some(failure.extended_code)
        }
        _ => None,
    }
}
