use std::sync::Arc;

use uuid::Uuid;

use crate::common::{Clock, Message};
use crate::error::{PresenceError, PresenceResult};
use crate::storage::{MessageDatabase, MessageFilter};

/// Append-only log of messages between friends.
pub struct MessageLog {
    messages: MessageDatabase,
    clock: Arc<dyn Clock>,
}

impl MessageLog {
    pub fn new(messages: MessageDatabase, clock: Arc<dyn Clock>) -> Self {
        Self { messages, clock }
    }

    /// Store a message stamped with the current time. Sender and recipient
    /// are not checked against the registry.
    pub fn append(
        &self,
        from_friend_id: &str,
        to_friend_id: &str,
        body: serde_json::Value,
    ) -> PresenceResult<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            from_friend_id: from_friend_id.to_string(),
            to_friend_id: to_friend_id.to_string(),
            timestamp: self.clock.now(),
            body,
        };
        self.messages
            .insert_message(&message)
            .map_err(PresenceError::store("append message"))?;
        Ok(message)
    }

    /// Newest first.
    pub fn query_ordered(&self, filter: &MessageFilter) -> PresenceResult<Vec<Message>> {
        self.messages
            .query_ordered(filter)
            .map_err(PresenceError::store("query messages"))
    }

    pub fn get_all(&self) -> PresenceResult<Vec<Message>> {
        self.messages
            .get_all()
            .map_err(PresenceError::store("list messages"))
    }
}
