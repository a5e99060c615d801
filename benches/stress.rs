use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use roombook::booking::{BookingError, BookingService, NewBooking};
use roombook::contacts::Directory;
use roombook::model::{Employee, Ms, Room, RoomId, Span};
use roombook::notify::TracingNotifier;
use roombook::reminder::{ReminderScheduler, ReminderStatus, SchedulerConfig};
use roombook::store::Store;
use roombook::validate::ValidationError;

const MIN: Ms = 60_000;
/// 2025-01-06T00:00:00Z
const DAY0: Ms = 1_736_121_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

struct Bench {
    svc: Arc<BookingService>,
    store: Arc<Store>,
    directory: Arc<Directory>,
    organizer: Ulid,
}

fn setup() -> Bench {
    let dir = std::env::temp_dir().join(format!("roombook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let store = Arc::new(Store::new(dir.join("roombook.wal")).expect("open store"));
    let directory = Arc::new(Directory::new());
    let organizer = Ulid::new();
    directory.upsert(Employee {
        id: organizer,
        name: "Bench".into(),
        email: "bench@example.com".into(),
    });
    let svc = Arc::new(BookingService::new(store.clone(), directory.clone(), Arc::new(TracingNotifier)));
    Bench {
        svc,
        store,
        directory,
        organizer,
    }
}

async fn room(bench: &Bench, capacity: u32) -> RoomId {
    bench
        .svc
        .create_room(Room::new(Ulid::new(), Some(capacity)))
        .await
        .expect("create room")
        .id
}

async fn phase1_sequential(bench: &Bench) {
    let rid = room(bench, 10).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = DAY0 + (i as Ms) * 30 * MIN;
        let t = Instant::now();
        bench
            .svc
            .create(NewBooking {
                room_id: rid,
                organizer: bench.organizer,
                span: Span::new(s, s + 30 * MIN),
                attendees: 4,
            })
            .await
            .expect("sequential create");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

/// Many tasks race for overlapping slots in one room. Whatever wins, the
/// room must end up with no two overlapping bookings.
async fn phase2_contention(bench: &Bench) {
    let rid = room(bench, 10).await;
    let n_tasks = 16;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let svc = bench.svc.clone();
        let organizer = bench.organizer;
        handles.push(tokio::spawn(async move {
            let (mut ok, mut conflict) = (0usize, 0usize);
            for j in 0..n_per_task {
                // Staggered 45-minute slots on a 30-minute grid: neighbours collide.
                let s = DAY0 + ((j * 2 + t % 3) as Ms) * 15 * MIN;
                let result = svc
                    .create(NewBooking {
                        room_id: rid,
                        organizer,
                        span: Span::new(s, s + 45 * MIN),
                        attendees: 2,
                    })
                    .await;
                match result {
                    Ok(_) => ok += 1,
                    Err(BookingError::Validation(ValidationError::TimeConflict(_))) => conflict += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (ok, conflict)
        }));
    }

    let (mut ok, mut conflict) = (0, 0);
    for h in handles {
        let (o, c) = h.await.expect("contention task");
        ok += o;
        conflict += c;
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks x {n_per_task} attempts: {ok} accepted, {conflict} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );

    let all = bench
        .svc
        .list_for_room(rid, Span::new(DAY0, DAY0 + 7 * 24 * 60 * MIN))
        .await
        .expect("list bookings");
    assert_eq!(all.len(), ok);
    for pair in all.windows(2) {
        assert!(
            pair[0].span.end <= pair[1].span.start,
            "overlap between {} and {}",
            pair[0].id,
            pair[1].id
        );
    }
    println!("  invariant holds: {} bookings, none overlapping", all.len());
}

async fn phase3_parallel_rooms(bench: &Bench) {
    let n_rooms = 10;
    let n_per_room = 200;
    let mut rooms = Vec::with_capacity(n_rooms);
    for _ in 0..n_rooms {
        rooms.push(room(bench, 8).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for rid in rooms {
        let svc = bench.svc.clone();
        let organizer = bench.organizer;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_room {
                let s = DAY0 + (j as Ms) * 60 * MIN;
                svc.create(NewBooking {
                    room_id: rid,
                    organizer,
                    span: Span::new(s, s + 60 * MIN),
                    attendees: 8,
                })
                .await
                .expect("parallel create");
            }
        }));
    }
    for h in handles {
        h.await.expect("room task");
    }

    let elapsed = start.elapsed();
    let total = n_rooms * n_per_room;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_rooms} rooms x {n_per_room} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase4_reminder_sweep(bench: &Bench) {
    let n_rooms = 50;
    let now = DAY0 + 60 * 24 * 60 * MIN;
    for _ in 0..n_rooms {
        let rid = room(bench, 6).await;
        for k in 0..4 {
            let s = now + (k as Ms + 1) * 2 * MIN;
            bench
                .svc
                .create(NewBooking {
                    room_id: rid,
                    organizer: bench.organizer,
                    span: Span::new(s, s + 2 * MIN),
                    attendees: 3,
                })
                .await
                .expect("due booking");
        }
    }

    let scheduler = ReminderScheduler::new(
        bench.store.clone(),
        bench.directory.clone(),
        Arc::new(TracingNotifier),
        SchedulerConfig::default(),
    );
    let t = Instant::now();
    let outcomes = scheduler.tick(now).await;
    let first = t.elapsed();
    let sent = outcomes
        .iter()
        .filter(|o| matches!(o.status, ReminderStatus::Sent { .. }))
        .count();

    let t = Instant::now();
    let repeat = scheduler.tick(now).await;
    let second = t.elapsed();
    assert!(repeat.is_empty(), "repeat tick sent {} reminders", repeat.len());

    println!(
        "  {sent}/{} reminders in {:.2}ms, idle repeat tick {:.2}ms",
        outcomes.len(),
        first.as_secs_f64() * 1000.0,
        second.as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== roombook stress benchmark ===\n");
    let bench = setup();

    println!("[phase 1] sequential create throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] same-room contention");
    phase2_contention(&bench).await;

    println!("\n[phase 3] parallel rooms");
    phase3_parallel_rooms(&bench).await;

    println!("\n[phase 4] reminder sweep");
    phase4_reminder_sweep(&bench).await;

    println!(
        "\n{} rooms, {} bookings in store",
        bench.store.room_count(),
        bench.store.booking_count()
    );
    println!("=== benchmark complete ===");
}
