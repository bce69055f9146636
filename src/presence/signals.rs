use std::sync::Arc;

use crate::common::{Clock, Signal};
use crate::error::{PresenceError, PresenceResult};
use crate::storage::{EnqueueOutcome, SignalDatabase};

/// Per-friend inbound queue of color signals.
///
/// Producers only ever append. The display side takes everything pending with
/// [`SignalQueue::drain`]; until it does, entries stay queued.
pub struct SignalQueue {
    signals: SignalDatabase,
    clock: Arc<dyn Clock>,
    capacity: Option<usize>,
}

impl SignalQueue {
    pub fn new(signals: SignalDatabase, clock: Arc<dyn Clock>) -> Self {
        Self {
            signals,
            clock,
            capacity: None,
        }
    }

    /// Reject pushes once a friend has `capacity` undrained signals.
    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Append `signal` to the friend's queue and return the new depth.
    pub fn enqueue(&self, friend_id: &str, signal: Signal) -> PresenceResult<usize> {
        if signal.is_empty() {
            return Err(PresenceError::EmptySignal);
        }

        let outcome = self
            .signals
            .enqueue(friend_id, &signal, self.clock.now(), self.capacity)
            .map_err(PresenceError::store("enqueue signal"))?;

        match outcome {
            EnqueueOutcome::Queued { seq, depth } => {
                log::debug!("Queued signal #{seq} for {friend_id} (depth {depth})");
                Ok(depth)
            }
            EnqueueOutcome::UnknownFriend => Err(PresenceError::NotFound(friend_id.to_string())),
            EnqueueOutcome::Full { depth } => {
                log::warn!("Signal queue for {friend_id} is full at {depth} entries");
                Err(PresenceError::QueueFull(friend_id.to_string()))
            }
        }
    }

    pub fn pending(&self, friend_id: &str) -> PresenceResult<Vec<Signal>> {
        self.signals
            .pending(friend_id)
            .map_err(PresenceError::store("read signal queue"))?
            .ok_or_else(|| PresenceError::NotFound(friend_id.to_string()))
    }

    pub fn drain(&self, friend_id: &str) -> PresenceResult<Vec<Signal>> {
        let drained = self
            .signals
            .drain(friend_id)
            .map_err(PresenceError::store("drain signal queue"))?
            .ok_or_else(|| PresenceError::NotFound(friend_id.to_string()))?;
        log::debug!("Drained {} signals for {friend_id}", drained.len());
        Ok(drained)
    }
}
