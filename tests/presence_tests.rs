use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{Duration, TimeZone, Utc};

use friend_ping::Coordinator;
use friend_ping::PresenceError;
use friend_ping::common::{Clock, Color, ManualClock, MidnightPolicy, Signal};
use friend_ping::config::AppConfig;
use friend_ping::presence::AllocationStrategy;
use friend_ping::storage::{Database, MessageFilter};

fn config_with_palette(palette: &[&str]) -> AppConfig {
    AppConfig {
        palette: palette.iter().map(|color| color.to_string()).collect(),
        ..AppConfig::default()
    }
}

fn coordinator(config: &AppConfig) -> (Coordinator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 30, 0).unwrap(),
    ));
    let db = Database::in_memory().expect("open in-memory db");
    let coordinator =
        Coordinator::with_database(db, config, clock.clone()).expect("wire coordinator");
    (coordinator, clock)
}

#[test]
fn two_friends_in_a_group_get_different_colors_and_windows() {
    let (app, _clock) = coordinator(&AppConfig::default());

    let a = app.registry.create_friend("A", "G").unwrap();
    assert_eq!(a.timeout.start.to_string(), "00:00");
    assert_eq!(a.timeout.end.to_string(), "23:59");
    assert!(a.queue.is_empty());

    let b = app.registry.create_friend("B", "G").unwrap();
    assert_ne!(a.color, b.color);

    app.registry.set_timeout("A", "09:00", "17:00").unwrap();
    let window = app.registry.get_timeout("A").unwrap();
    assert_eq!(
        serde_json::to_value(window).unwrap(),
        serde_json::json!({ "start": "09:00", "end": "17:00" })
    );
}

#[test]
fn duplicate_friend_id_fails_in_any_group() {
    let (app, _clock) = coordinator(&AppConfig::default());
    app.registry.create_friend("A", "G").unwrap();
    assert!(matches!(
        app.registry.create_friend("A", "H"),
        Err(PresenceError::AlreadyExists(_))
    ));
}

#[test]
fn unknown_friends_are_not_found() {
    let (app, _clock) = coordinator(&AppConfig::default());
    assert!(matches!(
        app.registry.get_friend("nobody"),
        Err(PresenceError::NotFound(_))
    ));
    assert!(matches!(
        app.registry.update_timestamp("nobody", Utc::now()),
        Err(PresenceError::NotFound(_))
    ));
    assert!(matches!(
        app.signals.enqueue("nobody", Signal::from(["red"])),
        Err(PresenceError::NotFound(_))
    ));
}

#[test]
fn update_timestamp_is_visible_to_get_friend() {
    let (app, clock) = coordinator(&AppConfig::default());
    app.registry.create_friend("A", "G").unwrap();

    let later = clock.now() + Duration::minutes(5);
    app.registry.update_timestamp("A", later).unwrap();
    assert_eq!(app.registry.get_friend("A").unwrap().last_ping, later);
}

#[test]
fn signals_queue_in_arrival_order() {
    let (app, _clock) = coordinator(&AppConfig::default());
    app.registry.create_friend("A", "G").unwrap();

    app.signals.enqueue("A", Signal::from(["red"])).unwrap();
    app.signals.enqueue("A", Signal::from(["blue"])).unwrap();

    let queue = app.registry.get_friend("A").unwrap().queue;
    assert_eq!(
        serde_json::to_value(&queue).unwrap(),
        serde_json::json!([["red"], ["blue"]])
    );

    assert!(matches!(
        app.signals.enqueue("A", Signal(Vec::new())),
        Err(PresenceError::EmptySignal)
    ));

    assert_eq!(app.signals.drain("A").unwrap(), queue);
    assert!(app.registry.get_friend("A").unwrap().queue.is_empty());
}

#[test]
fn queue_capacity_is_enforced_when_configured() {
    let config = AppConfig {
        queue_capacity: Some(1),
        ..AppConfig::default()
    };
    let (app, _clock) = coordinator(&config);
    app.registry.create_friend("A", "G").unwrap();

    app.signals.enqueue("A", Signal::from(["red"])).unwrap();
    assert!(matches!(
        app.signals.enqueue("A", Signal::from(["blue"])),
        Err(PresenceError::QueueFull(_))
    ));

    app.signals.drain("A").unwrap();
    assert_eq!(app.signals.enqueue("A", Signal::from(["blue"])).unwrap(), 1);
}

#[test]
fn message_history_is_newest_first_regardless_of_insert_order() {
    let (app, clock) = coordinator(&AppConfig::default());
    let t1 = clock.now() + Duration::seconds(1);
    let t2 = clock.now() + Duration::seconds(2);
    let t3 = clock.now() + Duration::seconds(3);

    for (at, text) in [(t2, "second"), (t1, "first"), (t3, "third")] {
        clock.set(at);
        app.messages
            .append("A", "B", serde_json::json!({ "text": text }))
            .unwrap();
    }
    clock.set(t3);
    app.messages
        .append("B", "A", serde_json::json!({ "text": "reply" }))
        .unwrap();

    let history = app
        .messages
        .query_ordered(&MessageFilter::between("A", "B"))
        .unwrap();
    let stamps: Vec<_> = history.iter().map(|message| message.timestamp).collect();
    assert_eq!(stamps, [t3, t2, t1]);
    assert!(stamps.windows(2).all(|pair| pair[0] >= pair[1]));

    assert_eq!(app.messages.get_all().unwrap().len(), 4);
}

#[test]
fn palette_exhaustion_instead_of_duplicate_color() {
    let palette = ["red", "green", "blue"];
    let (app, _clock) = coordinator(&config_with_palette(&palette));

    for i in 0..palette.len() {
        app.registry.create_friend(&format!("f{i}"), "G").unwrap();
    }
    assert!(matches!(
        app.registry.create_friend("one-too-many", "G"),
        Err(PresenceError::PaletteExhausted(group)) if group == "G"
    ));

    let colors: HashSet<_> = app
        .registry
        .get_friends_in_group("G")
        .unwrap()
        .into_iter()
        .map(|friend| friend.color)
        .collect();
    assert_eq!(colors.len(), palette.len());
}

#[test]
fn concurrent_creation_never_shares_a_color() {
    let (app, _clock) = coordinator(&AppConfig::default());
    let palette_size = AppConfig::default().palette.len();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..palette_size + 4)
            .map(|i| {
                let app = &app;
                scope.spawn(move || app.registry.create_friend(&format!("f{i}"), "G"))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let created: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(PresenceError::PaletteExhausted(_))))
        .count();
    assert_eq!(created.len(), palette_size);
    assert_eq!(exhausted, 4);

    let colors: HashSet<&Color> = created.iter().map(|friend| &friend.color).collect();
    assert_eq!(colors.len(), palette_size);
}

#[test]
fn concurrent_duplicate_ids_create_exactly_one() {
    let (app, _clock) = coordinator(&AppConfig::default());

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let app = &app;
                scope.spawn(move || app.registry.create_friend("same", &format!("g{}", i % 2)))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(PresenceError::AlreadyExists(_))))
    );
}

#[test]
fn separate_connections_to_one_file_keep_colors_unique() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("friend_ping.db");
    let config = AppConfig {
        database_path: path.to_string_lossy().into_owned(),
        allocation: AllocationStrategy::Random,
        ..AppConfig::default()
    };

    // Two coordinators share nothing but the database file.
    let first = Coordinator::open(&config).unwrap();
    let second = Coordinator::open(&config).unwrap();
    let palette_size = config.palette.len();

    thread::scope(|scope| {
        for (n, app) in [&first, &second].into_iter().enumerate() {
            scope.spawn(move || {
                for i in 0..palette_size / 2 {
                    app.registry
                        .create_friend(&format!("c{n}-f{i}"), "G")
                        .unwrap();
                }
            });
        }
    });

    let friends = first.registry.get_friends_in_group("G").unwrap();
    assert_eq!(friends.len(), palette_size);
    let colors: HashSet<_> = friends.into_iter().map(|friend| friend.color).collect();
    assert_eq!(colors.len(), palette_size);
}

#[test]
fn stale_friend_is_purged_and_its_color_reused() {
    let (app, clock) = coordinator(&config_with_palette(&["red", "blue"]));
    app.registry.create_friend("A", "G").unwrap();
    app.registry.create_friend("B", "G").unwrap();
    app.signals.enqueue("A", Signal::from(["blue"])).unwrap();

    clock.advance(Duration::seconds(100));
    app.registry.ping("B", serde_json::json!(["tile-1"])).unwrap();
    clock.advance(Duration::seconds(100));

    let purged = app.monitor().sweep().unwrap();
    assert_eq!(purged.len(), 1);
    assert_eq!(purged[0].friend_id, "A");
    assert!(matches!(
        app.registry.get_friend("A"),
        Err(PresenceError::NotFound(_))
    ));

    let c = app.registry.create_friend("C", "G").unwrap();
    assert_eq!(c.color, purged[0].color);
    assert!(c.queue.is_empty());
}

#[test]
fn midnight_policy_changes_reachability() {
    let night = chrono::NaiveTime::from_hms_opt(23, 15, 0).unwrap();

    let (wrap, _clock) = coordinator(&AppConfig::default());
    wrap.registry.create_friend("A", "G").unwrap();
    wrap.registry.set_timeout("A", "22:00", "06:00").unwrap();
    assert!(wrap.registry.is_reachable_at("A", night).unwrap());

    let strict_config = AppConfig {
        midnight_policy: MidnightPolicy::Strict,
        ..AppConfig::default()
    };
    let (strict, _clock) = coordinator(&strict_config);
    strict.registry.create_friend("A", "G").unwrap();
    strict.registry.set_timeout("A", "22:00", "06:00").unwrap();
    assert!(!strict.registry.is_reachable_at("A", night).unwrap());
}
