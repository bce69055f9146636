use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use super::registry::FriendRegistry;
use crate::common::{Clock, PresenceEvent};
use crate::error::PresenceResult;
use crate::storage::models::PurgedFriend;

/// Friends silent for longer than this are purged.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(150);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// `tokio::time::interval` panics on a zero period.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Background sweep that expires friends whose last ping is too old.
pub struct PresenceMonitor {
    registry: Arc<FriendRegistry>,
    stale_after: Duration,
    sweep_interval: Duration,
}

impl PresenceMonitor {
    pub fn new(registry: Arc<FriendRegistry>) -> Self {
        Self {
            registry,
            stale_after: DEFAULT_STALE_AFTER,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Values below `MIN_SWEEP_INTERVAL` are raised to it.
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Purge everything that has not pinged within `stale_after`.
    pub fn sweep(&self) -> PresenceResult<Vec<PurgedFriend>> {
        let threshold = TimeDelta::from_std(self.stale_after).unwrap_or(TimeDelta::MAX);
        let cutoff = self
            .registry
            .clock()
            .now()
            .checked_sub_signed(threshold)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        self.registry.purge_stale(cutoff)
    }

    /// Sweep on every tick until `shutdown` resolves, reporting purges on `events`.
    pub async fn run<S>(self: Arc<Self>, events: mpsc::Sender<PresenceEvent>, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!(
            "Presence monitor started (stale after {:?}, sweep every {:?})",
            self.stale_after,
            self.sweep_interval
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Presence monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let monitor = Arc::clone(&self);
                    let swept = tokio::task::spawn_blocking(move || monitor.sweep()).await;
                    let reports = match swept {
                        Ok(Ok(purged)) => purged
                            .into_iter()
                            .map(|friend| PresenceEvent::FriendPurged {
                                friend_id: friend.friend_id,
                                group_id: friend.group_id,
                                color: friend.color,
                            })
                            .collect(),
                        Ok(Err(err)) => {
                            log::warn!("Presence sweep failed: {err}");
                            vec![PresenceEvent::SweepFailed(err.to_string())]
                        }
                        Err(err) => {
                            log::error!("Presence sweep task panicked: {err}");
                            vec![PresenceEvent::SweepFailed(err.to_string())]
                        }
                    };

                    for event in reports {
                        if events.send(event).await.is_err() {
                            log::debug!("No listener for presence events");
                        }
                    }
                }
            }
        }
    }
}
