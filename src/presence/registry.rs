use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveTime, Utc};

use super::allocator::ColorAllocator;
use crate::common::{Clock, Friend, MidnightPolicy, TimeoutWindow};
use crate::error::{PresenceError, PresenceResult};
use crate::storage::models::PurgedFriend;
use crate::storage::{CreateOutcome, FriendDatabase};

/// How often a create is retried after the store reports a color clash.
const MAX_COLOR_ATTEMPTS: usize = 3;

/// One mutex per group. Creation and purge of a group's members run under it.
///
/// An entry only lives while some caller holds or waits on it, so the map is
/// bounded by the number of groups with work in flight.
#[derive(Default)]
struct GroupLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    fn with_group<T>(&self, group_id: &str, f: impl FnOnce() -> T) -> T {
        let handle = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(group_id.to_string()).or_default())
        };

        let result = {
            let _guard = handle.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        // Handles are only cloned under the map lock, so a count of two
        // (map + ours) means nobody else is holding or waiting.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&handle) == 2 {
            locks.remove(group_id);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Owns friend records: creation, lookup, liveness and reachability windows.
pub struct FriendRegistry {
    friends: FriendDatabase,
    allocator: Arc<dyn ColorAllocator>,
    clock: Arc<dyn Clock>,
    midnight_policy: MidnightPolicy,
    group_locks: GroupLocks,
}

impl FriendRegistry {
    pub fn new(
        friends: FriendDatabase,
        allocator: Arc<dyn ColorAllocator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            friends,
            allocator,
            clock,
            midnight_policy: MidnightPolicy::default(),
            group_locks: GroupLocks::default(),
        }
    }

    pub fn with_midnight_policy(mut self, policy: MidnightPolicy) -> Self {
        self.midnight_policy = policy;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register `friend_id` in `group_id` with a color nobody else in the
    /// group holds.
    ///
    /// A pick rejected by the `(group_id, color)` constraint is retried up to
    /// `MAX_COLOR_ATTEMPTS` times; this guards against allocators that ignore
    /// the reserved set and against writers outside this process.
    pub fn create_friend(&self, friend_id: &str, group_id: &str) -> PresenceResult<Friend> {
        self.group_locks.with_group(group_id, || {
            for attempt in 1..=MAX_COLOR_ATTEMPTS {
                let outcome = self
                    .friends
                    .create_friend(friend_id, group_id, self.clock.now(), |reserved| {
                        self.allocator.allocate(reserved).ok()
                    })
                    .map_err(PresenceError::store("create friend"))?;

                match outcome {
                    CreateOutcome::Created(friend) => {
                        log::info!(
                            "Friend {} joined group {} as {}",
                            friend.friend_id,
                            friend.group_id,
                            friend.color
                        );
                        return Ok(friend);
                    }
                    CreateOutcome::DuplicateId => {
                        return Err(PresenceError::AlreadyExists(friend_id.to_string()));
                    }
                    CreateOutcome::PaletteExhausted => {
                        log::warn!("Group {group_id} has no free color left for {friend_id}");
                        return Err(PresenceError::PaletteExhausted(group_id.to_string()));
                    }
                    CreateOutcome::ColorTaken(color) => {
                        log::warn!(
                            "Color {color} in group {group_id} was claimed concurrently (attempt {attempt}/{MAX_COLOR_ATTEMPTS})"
                        );
                    }
                }
            }
            Err(PresenceError::ColorConflict(group_id.to_string()))
        })
    }

    pub fn get_friend(&self, friend_id: &str) -> PresenceResult<Friend> {
        self.friends
            .get_friend(friend_id)
            .map_err(PresenceError::store("get friend"))?
            .ok_or_else(|| PresenceError::NotFound(friend_id.to_string()))
    }

    pub fn get_all_friends(&self) -> PresenceResult<Vec<Friend>> {
        self.friends
            .get_all_friends()
            .map_err(PresenceError::store("list friends"))
    }

    pub fn get_friends_in_group(&self, group_id: &str) -> PresenceResult<Vec<Friend>> {
        self.friends
            .get_friends_in_group(group_id)
            .map_err(PresenceError::store("list group"))
    }

    /// Record a liveness ping carrying the friend's current tiles.
    pub fn ping(&self, friend_id: &str, tile_ids: serde_json::Value) -> PresenceResult<()> {
        let matched = self
            .friends
            .record_ping(friend_id, &tile_ids, self.clock.now())
            .map_err(PresenceError::store("ping"))?;
        if !matched {
            return Err(PresenceError::NotFound(friend_id.to_string()));
        }
        log::debug!("Ping from {friend_id}");
        Ok(())
    }

    pub fn update_timestamp(&self, friend_id: &str, timestamp: DateTime<Utc>) -> PresenceResult<()> {
        let matched = self
            .friends
            .update_last_ping(friend_id, timestamp)
            .map_err(PresenceError::store("update timestamp"))?;
        if !matched {
            return Err(PresenceError::NotFound(friend_id.to_string()));
        }
        Ok(())
    }

    /// Set the daily reachability window. `start` and `end` are `HH:MM` in UTC.
    pub fn set_timeout(&self, friend_id: &str, start: &str, end: &str) -> PresenceResult<TimeoutWindow> {
        let window = TimeoutWindow::parse(start, end)?;
        let matched = self
            .friends
            .set_timeout(friend_id, &window)
            .map_err(PresenceError::store("set timeout"))?;
        if !matched {
            return Err(PresenceError::NotFound(friend_id.to_string()));
        }
        if window.spans_midnight() && self.midnight_policy == MidnightPolicy::Strict {
            log::warn!("Timeout {start}-{end} for {friend_id} spans midnight and is never open");
        }
        Ok(window)
    }

    pub fn get_timeout(&self, friend_id: &str) -> PresenceResult<TimeoutWindow> {
        self.friends
            .get_timeout(friend_id)
            .map_err(PresenceError::store("get timeout"))?
            .ok_or_else(|| PresenceError::NotFound(friend_id.to_string()))
    }

    /// Whether the friend accepts pings at this UTC time of day.
    pub fn is_reachable_at(&self, friend_id: &str, time: NaiveTime) -> PresenceResult<bool> {
        let window = self.get_timeout(friend_id)?;
        Ok(window.contains(time, self.midnight_policy))
    }

    /// Checks the window against the clock's current UTC time of day.
    pub fn is_reachable(&self, friend_id: &str) -> PresenceResult<bool> {
        self.is_reachable_at(friend_id, self.clock.now().time())
    }

    /// Remove every friend whose last ping is older than `cutoff`.
    ///
    /// Each removal re-checks staleness under the group lock, so a ping that
    /// lands between the scan and the delete keeps the friend alive.
    pub fn purge_stale(&self, cutoff: DateTime<Utc>) -> PresenceResult<Vec<PurgedFriend>> {
        let candidates = self
            .friends
            .stale_friends(cutoff)
            .map_err(PresenceError::store("scan stale friends"))?;

        let mut purged = Vec::new();
        for candidate in candidates {
            let removed = self.group_locks.with_group(&candidate.group_id, || {
                self.friends
                    .purge_if_stale(&candidate.friend_id, cutoff)
                    .map_err(PresenceError::store("purge friend"))
            })?;
            if let Some(friend) = removed {
                log::info!(
                    "Purged {} from group {}; color {} is free again",
                    friend.friend_id,
                    friend.group_id,
                    friend.color
                );
                purged.push(friend);
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Color, ManualClock};
    use crate::presence::allocator::{AllocationStrategy, PaletteAllocator};
    use crate::storage::Database;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::presence::allocator::PaletteExhausted;

    /// Always hands out red, reserved or not, and counts how often it was asked.
    #[derive(Default)]
    struct AlwaysRed {
        calls: AtomicUsize,
    }

    impl ColorAllocator for AlwaysRed {
        fn allocate(&self, _reserved: &HashSet<Color>) -> Result<Color, PaletteExhausted> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Color::from("red"))
        }
    }

    fn registry(palette: &[&str]) -> (FriendRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let friends = FriendDatabase::new(Database::in_memory().unwrap()).unwrap();
        let allocator = PaletteAllocator::new(
            palette.iter().map(|name| Color::from(*name)),
            AllocationStrategy::FirstFree,
        );
        let registry = FriendRegistry::new(friends, Arc::new(allocator), clock.clone());
        (registry, clock)
    }

    #[test]
    fn create_assigns_distinct_colors() {
        let (registry, clock) = registry(&["red", "blue"]);

        let a = registry.create_friend("a", "g").unwrap();
        let b = registry.create_friend("b", "g").unwrap();
        assert_eq!(a.color, Color::from("red"));
        assert_eq!(b.color, Color::from("blue"));
        assert_eq!(a.timeout, TimeoutWindow::default());
        assert_eq!(a.last_ping, clock.now());

        // Another group draws from the full palette again.
        let c = registry.create_friend("c", "h").unwrap();
        assert_eq!(c.color, Color::from("red"));

        assert_eq!(registry.get_friends_in_group("g").unwrap().len(), 2);
        assert_eq!(registry.get_all_friends().unwrap().len(), 3);
    }

    #[test]
    fn duplicate_id_is_rejected_across_groups() {
        let (registry, _clock) = registry(&["red", "blue"]);
        registry.create_friend("a", "g").unwrap();
        let err = registry.create_friend("a", "other").unwrap_err();
        assert!(matches!(err, PresenceError::AlreadyExists(id) if id == "a"));
    }

    #[test]
    fn palette_exhaustion_is_an_error() {
        let (registry, _clock) = registry(&["red"]);
        registry.create_friend("a", "g").unwrap();
        let err = registry.create_friend("b", "g").unwrap_err();
        assert!(matches!(err, PresenceError::PaletteExhausted(group) if group == "g"));
        assert!(matches!(
            registry.get_friend("b"),
            Err(PresenceError::NotFound(_))
        ));
    }

    #[test]
    fn missing_friend_is_not_found_everywhere() {
        let (registry, _clock) = registry(&["red"]);
        let not_found = |result: PresenceResult<()>| {
            assert!(matches!(result, Err(PresenceError::NotFound(id)) if id == "ghost"));
        };
        not_found(registry.get_friend("ghost").map(|_| ()));
        not_found(registry.ping("ghost", serde_json::json!([1])));
        not_found(registry.update_timestamp("ghost", Utc::now()));
        not_found(registry.set_timeout("ghost", "09:00", "17:00").map(|_| ()));
        not_found(registry.get_timeout("ghost").map(|_| ()));
        not_found(registry.is_reachable("ghost").map(|_| ()));
    }

    #[test]
    fn ping_refreshes_liveness_and_tiles() {
        let (registry, clock) = registry(&["red"]);
        registry.create_friend("a", "g").unwrap();

        clock.advance(Duration::seconds(42));
        registry.ping("a", serde_json::json!(["tile-3", "tile-7"])).unwrap();

        let friend = registry.get_friend("a").unwrap();
        assert_eq!(friend.last_ping, clock.now());
        assert_eq!(friend.tile_ids, serde_json::json!(["tile-3", "tile-7"]));
    }

    #[test]
    fn timeout_window_round_trips_and_validates() {
        let (registry, _clock) = registry(&["red"]);
        registry.create_friend("a", "g").unwrap();

        registry.set_timeout("a", "09:00", "17:00").unwrap();
        let window = registry.get_timeout("a").unwrap();
        assert_eq!(window.start.to_string(), "09:00");
        assert_eq!(window.end.to_string(), "17:00");

        let err = registry.set_timeout("a", "9am", "17:00").unwrap_err();
        assert!(matches!(err, PresenceError::InvalidTimeOfDay(raw) if raw == "9am"));
        assert_eq!(registry.get_timeout("a").unwrap(), window);
    }

    #[test]
    fn reachability_follows_clock_and_policy() {
        let (registry, clock) = registry(&["red", "blue"]);
        registry.create_friend("a", "g").unwrap();
        registry.set_timeout("a", "22:00", "06:00").unwrap();

        // Clock starts at 12:00 UTC.
        assert!(!registry.is_reachable("a").unwrap());
        clock.advance(Duration::hours(11));
        assert!(registry.is_reachable("a").unwrap());

        let strict = {
            let (registry, _) = registry_with_policy(MidnightPolicy::Strict);
            registry.create_friend("a", "g").unwrap();
            registry.set_timeout("a", "22:00", "06:00").unwrap();
            registry
                .is_reachable_at("a", NaiveTime::from_hms_opt(23, 0, 0).unwrap())
                .unwrap()
        };
        assert!(!strict);
    }

    fn registry_with_policy(policy: MidnightPolicy) -> (FriendRegistry, Arc<ManualClock>) {
        let (registry, clock) = registry(&["red"]);
        (registry.with_midnight_policy(policy), clock)
    }

    #[test]
    fn purge_releases_color() {
        let (registry, clock) = registry(&["red", "blue"]);
        registry.create_friend("a", "g").unwrap();
        clock.advance(Duration::seconds(100));
        registry.create_friend("b", "g").unwrap();
        clock.advance(Duration::seconds(100));

        let purged = registry
            .purge_stale(clock.now() - Duration::seconds(150))
            .unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].friend_id, "a");

        let c = registry.create_friend("c", "g").unwrap();
        assert_eq!(c.color, Color::from("red"));
    }

    #[test]
    fn allocator_ignoring_reserved_colors_hits_retry_limit() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let friends = FriendDatabase::new(Database::in_memory().unwrap()).unwrap();
        let allocator = Arc::new(AlwaysRed::default());
        let registry = FriendRegistry::new(friends, allocator.clone(), clock);

        registry.create_friend("a", "g").unwrap();
        assert_eq!(allocator.calls.load(Ordering::SeqCst), 1);

        let err = registry.create_friend("b", "g").unwrap_err();
        assert!(matches!(err, PresenceError::ColorConflict(group) if group == "g"));
        assert_eq!(allocator.calls.load(Ordering::SeqCst), 1 + MAX_COLOR_ATTEMPTS);
        assert!(matches!(
            registry.get_friend("b"),
            Err(PresenceError::NotFound(_))
        ));
        assert_eq!(registry.get_friends_in_group("g").unwrap().len(), 1);
    }

    #[test]
    fn group_locks_are_released_after_use() {
        let (registry, clock) = registry(&["red", "blue"]);
        for group in ["g1", "g2", "g3"] {
            registry.create_friend(&format!("{group}-a"), group).unwrap();
        }
        assert_eq!(registry.group_locks.len(), 0);

        clock.advance(Duration::seconds(300));
        registry
            .purge_stale(clock.now() - Duration::seconds(150))
            .unwrap();
        assert_eq!(registry.group_locks.len(), 0);
    }

    #[test]
    fn group_locks_drain_after_concurrent_creates() {
        let (registry, _clock) = registry(&["red", "blue"]);
        let registry = Arc::new(registry);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let registry = &registry;
                scope.spawn(move || {
                    let _ = registry.create_friend(&format!("f{i}"), "shared");
                });
            }
        });

        assert_eq!(registry.group_locks.len(), 0);
        let colors: HashSet<_> = registry
            .get_friends_in_group("shared")
            .unwrap()
            .into_iter()
            .map(|friend| friend.color)
            .collect();
        assert_eq!(colors.len(), 2);
    }

    #[test]
    fn windows_are_read_in_utc() {
        let (registry, clock) = registry(&["red"]);
        registry.create_friend("a", "g").unwrap();
        registry.set_timeout("a", "12:00", "12:30").unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 3, 1, 12, 15, 0).unwrap());
        assert!(registry.is_reachable("a").unwrap());

        // 12:15 in UTC+2 is 10:15 UTC, outside the window.
        let local = chrono::FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 1, 12, 15, 0)
            .unwrap();
        clock.set(local.with_timezone(&Utc));
        assert!(!registry.is_reachable("a").unwrap());
    }
}
