use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;
use ulid::Ulid;

use roombook::booking::{BookingService, NewBooking};
use roombook::contacts::{CachedContacts, Directory};
use roombook::model::{Employee, Ms, Room, Span};
use roombook::notify::Outbox;
use roombook::reminder::{now_ms, ReminderScheduler, ReminderStatus, SchedulerConfig};
use roombook::store::Store;

const M: Ms = 60_000;

fn wal_path() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("roombook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("roombook.wal")
}

#[tokio::test]
async fn room_a_reminders_end_to_end() {
    let store = Arc::new(Store::new(wal_path()).unwrap());
    let directory = Directory::new();
    let asha = Ulid::new();
    directory.upsert(Employee {
        id: asha,
        name: "Asha".into(),
        email: "asha@example.com".into(),
    });
    let contacts = Arc::new(CachedContacts::new(directory, Duration::from_secs(300)));
    let outbox = Arc::new(Outbox::new());
    let mut relay = outbox.subscribe();

    let svc = BookingService::new(store.clone(), contacts.clone(), outbox.clone());
    let room = svc.create_room(Room::new(Ulid::new(), Some(10))).await.unwrap();

    // 2025-01-06T09:55:00Z: B1 at 10:00 is inside the lookahead, B4 at 10:30 is not.
    let now: Ms = 1_736_157_300_000;
    let ten = now + 5 * M;
    let b1 = svc
        .create(NewBooking {
            room_id: room.id,
            organizer: asha,
            span: Span::new(ten, ten + 30 * M),
            attendees: 8,
        })
        .await
        .unwrap();
    let b4 = svc
        .create(NewBooking {
            room_id: room.id,
            organizer: asha,
            span: Span::new(ten + 30 * M, ten + 60 * M),
            attendees: 5,
        })
        .await
        .unwrap();
    // Drain the two confirmations.
    assert_ok!(relay.recv().await);
    assert_ok!(relay.recv().await);

    let scheduler = ReminderScheduler::new(store.clone(), contacts, outbox, SchedulerConfig::default());

    let outcomes = scheduler.tick(now).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].booking_id, b1.id);
    assert!(matches!(outcomes[0].status, ReminderStatus::Sent { .. }));

    let reminder = relay.recv().await.unwrap();
    assert_eq!(reminder.subject, "Meeting Reminder");
    assert_eq!(reminder.to, "asha@example.com");
    assert!(reminder.body.contains("2025-01-06T10:00:00Z"), "{}", reminder.body);
    assert!(reminder.body.contains("2025-01-06T10:30:00Z"), "{}", reminder.body);

    assert!(scheduler.tick(now + M).await.is_empty());

    // At 10:21 B4 comes due, once.
    let later = scheduler.tick(now + 26 * M).await;
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].booking_id, b4.id);
    assert!(scheduler.tick(now + 26 * M).await.is_empty());
}

#[tokio::test]
async fn no_relay_means_retry_later() {
    let store = Arc::new(Store::new(wal_path()).unwrap());
    let directory = Arc::new(Directory::new());
    let bo = Ulid::new();
    directory.upsert(Employee {
        id: bo,
        name: "Bo".into(),
        email: "bo@example.com".into(),
    });
    let outbox = Arc::new(Outbox::new());
    let svc = BookingService::new(store.clone(), directory.clone(), outbox.clone());
    let room = svc.create_room(Room::new(Ulid::new(), Some(4))).await.unwrap();

    let now = now_ms();
    let b = svc
        .create(NewBooking {
            room_id: room.id,
            organizer: bo,
            span: Span::new(now + 3 * M, now + 33 * M),
            attendees: 2,
        })
        .await
        .unwrap();

    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        directory,
        outbox.clone(),
        SchedulerConfig {
            tick_interval: Duration::from_millis(20),
            ..Default::default()
        },
    ));

    // Nobody is listening yet: the tick fails the send and leaves the flag.
    let outcomes = scheduler.tick(now).await;
    assert!(matches!(outcomes[0].status, ReminderStatus::SendFailed(_)));

    let mut relay = outbox.subscribe();
    let handle = scheduler.clone().start();
    let msg = tokio::time::timeout(Duration::from_secs(5), relay.recv())
        .await
        .expect("reminder never relayed")
        .unwrap();
    assert_eq!(msg.to, "bo@example.com");
    handle.stop().await;

    let stored = store.get_booking(b.id).await.unwrap();
    assert!(stored.reminder_sent);
}
