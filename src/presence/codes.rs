use std::sync::Arc;

use rand::RngCore;

use crate::common::Clock;
use crate::error::{PresenceError, PresenceResult};
use crate::storage::CodeDatabase;
use crate::storage::models::GeneratedCode;

const CODE_BYTES: usize = 4;

/// Write-once codes handed out to friends.
pub struct CodeBook {
    codes: CodeDatabase,
    clock: Arc<dyn Clock>,
}

impl CodeBook {
    pub fn new(codes: CodeDatabase, clock: Arc<dyn Clock>) -> Self {
        Self { codes, clock }
    }

    /// Store a caller-chosen code. A friend can only ever get one.
    pub fn store(&self, friend_id: &str, code: &str) -> PresenceResult<GeneratedCode> {
        let record = GeneratedCode {
            friend_id: friend_id.to_string(),
            code: code.to_string(),
            created_at: self.clock.now(),
        };
        let inserted = self
            .codes
            .insert_code(&record)
            .map_err(PresenceError::store("store code"))?;
        if !inserted {
            return Err(PresenceError::AlreadyExists(format!("code for {friend_id}")));
        }
        Ok(record)
    }

    /// Store a random 8-character hex code.
    pub fn generate(&self, friend_id: &str) -> PresenceResult<GeneratedCode> {
        let mut bytes = [0u8; CODE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.store(friend_id, &hex::encode_upper(bytes))
    }

    pub fn get(&self, friend_id: &str) -> PresenceResult<GeneratedCode> {
        self.codes
            .get_code(friend_id)
            .map_err(PresenceError::store("get code"))?
            .ok_or_else(|| PresenceError::NotFound(friend_id.to_string()))
    }
}
