//! End-to-end reconciliation through the public API: records seeded in the
//! durable store, a simulated remote, the driver loop, and the files it
//! leaves behind.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use tokio::sync::watch;

use helmsman::config::Config;
use helmsman::gateway::sim::SimGateway;
use helmsman::model::*;
use helmsman::notify::LogNotificationGateway;
use helmsman::reconcile::Driver;
use helmsman::store::RecordStore;

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("helmsman_it").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn future_day() -> (i64, String) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let day = (now / (24 * HOUR) + 2) * (24 * HOUR);
    let date = DateTime::from_timestamp(day, 0)
        .unwrap()
        .format("%Y-%m-%d")
        .to_string();
    (day, date)
}

fn record(id: i64, date: &str, time: &str, resource: &str) -> BookingRecord {
    BookingRecord {
        id,
        team: "blue".into(),
        resource: resource.into(),
        fallback_resource: String::new(),
        date: date.into(),
        time: time.into(),
        duration_min: 90,
        credentials: Credentials {
            username: "alice".into(),
            password: "secret".into(),
        },
        comment: String::new(),
        repeat: RepeatRule::None,
        state: BookingState::default(),
        external_id: String::new(),
        external_resource_id: String::new(),
        message: String::new(),
        next_eligible: 0,
        retry_count: 0,
        user_comment: false,
        notify_to: String::new(),
        granted_start: 0,
        granted_duration_min: 0,
        log: Vec::new(),
        epoch_date: 0,
        epoch_start: 0,
        epoch_end: 0,
        changed: false,
    }
}

#[tokio::test]
async fn single_run_books_everything_and_persists() {
    let dir = test_dir("single_run");
    let (day, date) = future_day();

    let sim = Arc::new(SimGateway::new());
    sim.seed_open_day(&date, "17", "Lynx", day + 6 * HOUR, day + 22 * HOUR)
        .await;
    sim.seed_open_day(&date, "18", "Argus", day + 6 * HOUR, day + 22 * HOUR)
        .await;

    let store_path = dir.join("booking.json");
    let store = RecordStore::new(&store_path);
    store
        .save_all(&[
            record(1, &date, "09:30", "Lynx"),
            record(2, &date, "10:00", "Argus"),
        ])
        .await
        .unwrap();

    let cfg = Config {
        single_run: true,
        ..Config::default()
    };
    let driver = Driver::new(store, sim.clone(), Arc::new(LogNotificationGateway), cfg);

    let (_tx, rx) = watch::channel(false);
    driver.run(rx).await.unwrap();

    // Both reservations exist remotely and the outcome is durable.
    assert_eq!(sim.reservation_ids().await.len(), 2);
    let raw = std::fs::read_to_string(&store_path).unwrap();
    let saved: Vec<BookingRecord> = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved.len(), 2);
    for r in &saved {
        assert_eq!(r.state, BookingState::Finished);
        assert!(!r.external_id.is_empty());
        assert!(!r.log.is_empty());
    }
}

#[tokio::test]
async fn corrupt_primary_survives_a_full_cycle() {
    let dir = test_dir("recovery");
    let (day, date) = future_day();

    let sim = Arc::new(SimGateway::new());
    sim.seed_open_day(&date, "17", "Lynx", day + 6 * HOUR, day + 22 * HOUR)
        .await;

    let store_path = dir.join("booking.json");
    let store = RecordStore::new(&store_path);
    // Two writes so the backup is a valid copy.
    store
        .save_all(&[record(1, &date, "09:30", "Lynx")])
        .await
        .unwrap();
    store
        .save_all(&[record(1, &date, "09:30", "Lynx")])
        .await
        .unwrap();

    // Simulate a crash mid-write that mangled the primary.
    std::fs::write(&store_path, b"\x00\x00 not json at all").unwrap();

    let cfg = Config {
        single_run: true,
        ..Config::default()
    };
    let driver = Driver::new(store, sim, Arc::new(LogNotificationGateway), cfg);
    let (_tx, rx) = watch::channel(false);
    driver.run(rx).await.unwrap();

    // The record came back through the backup, was booked, and the primary
    // is valid JSON again.
    let raw = std::fs::read_to_string(&store_path).unwrap();
    let saved: Vec<BookingRecord> = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].state, BookingState::Finished);
}

#[tokio::test]
async fn captured_schedule_file_drives_a_dry_run() {
    let dir = test_dir("seed_file");
    let (day, date) = future_day();

    // A captured observed schedule, as the dry-run mode consumes it.
    let seed = vec![DaySchedule {
        date: date.clone(),
        resources: vec![ResourceDay {
            external_id: "17".into(),
            name: "Lynx".into(),
            slots: vec![
                Slot {
                    kind: SlotKind::Blocked,
                    span: Span::new(day - 2 * HOUR, day + 6 * HOUR),
                    holder: String::new(),
                    external_id: String::new(),
                },
                Slot {
                    kind: SlotKind::Blocked,
                    span: Span::new(day + 22 * HOUR, day + 26 * HOUR),
                    holder: String::new(),
                    external_id: String::new(),
                },
                Slot {
                    kind: SlotKind::Reservation,
                    span: Span::new(day + 9 * HOUR, day + 10 * HOUR),
                    holder: "J. Doe".into(),
                    external_id: "foreign-1".into(),
                },
            ],
        }],
    }];
    let seed_path = dir.join("schedule.json");
    std::fs::write(&seed_path, serde_json::to_vec(&seed).unwrap()).unwrap();

    let sim = Arc::new(SimGateway::new());
    sim.load_days(&seed_path).await.unwrap();

    let store = RecordStore::new(dir.join("booking.json"));
    store
        .save_all(&[record(1, &date, "09:30", "Lynx")])
        .await
        .unwrap();

    let cfg = Config {
        single_run: true,
        ..Config::default()
    };
    let driver = Driver::new(store, sim, Arc::new(LogNotificationGateway), cfg);
    let (_tx, rx) = watch::channel(false);
    driver.run(rx).await.unwrap();

    // The foreign reservation from the captured schedule blocked us.
    let raw = std::fs::read_to_string(dir.join("booking.json")).unwrap();
    let saved: Vec<BookingRecord> = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved[0].state, BookingState::Blocked);
    assert!(saved[0].message.contains("J. Doe"));
}
