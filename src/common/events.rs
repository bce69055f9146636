use crate::common::types::Color;

/// Events emitted by the presence monitor to whoever is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A friend went quiet for too long and was removed; its color is free again.
    FriendPurged {
        friend_id: String,
        group_id: String,
        color: Color,
    },
    SweepFailed(String),
}
