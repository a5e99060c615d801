mod compactor;
mod error;
mod mutations;
mod queries;

pub use compactor::run_compactor;
pub use error::StoreError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::ports::{StorageReader, StorageWriter};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first Append, drain whatever else is queued, fsync once,
/// answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// WAL-backed in-memory room/booking store.
///
/// Each room sits behind its own `RwLock`; every booking write takes the
/// room's write lock and re-checks overlap before appending, which makes the
/// no-double-booking rule an exclusion constraint of the store itself.
pub struct Store {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<BookingId, RoomId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an event to one room. The caller holds the lock.
/// A room move is applied to both rooms: the old one drops the booking,
/// the new one inserts it.
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<BookingId, RoomId>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingUpdated {
            previous_room,
            booking,
        } => {
            if rs.room.id == *previous_room {
                rs.remove_booking(booking.id);
            }
            if rs.room.id == booking.room_id {
                rs.insert_booking(booking.clone());
            }
            index.insert(booking.id, booking.room_id);
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        Event::ReminderMarked { id, .. } => {
            if let Some(b) = rs.get_booking_mut(*id) {
                b.reminder_sent = true;
            }
        }
        Event::CalendarRefSet {
            id, calendar_ref, ..
        } => {
            if let Some(b) = rs.get_booking_mut(*id) {
                b.calendar_ref = calendar_ref.clone();
            }
        }
        Event::RoomUpdated {
            name,
            location,
            capacity,
            ..
        } => {
            rs.room.name = name.clone();
            rs.room.location = location.clone();
            rs.room.capacity = *capacity;
        }
        // Created/Deleted are handled at the DashMap level
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

/// Rooms an event touches (excluding Create/Delete).
fn event_rooms(event: &Event) -> Vec<RoomId> {
    match event {
        Event::BookingCreated { booking } => vec![booking.room_id],
        Event::BookingUpdated {
            previous_room,
            booking,
        } if *previous_room != booking.room_id => vec![*previous_room, booking.room_id],
        Event::BookingUpdated { booking, .. } => vec![booking.room_id],
        Event::BookingDeleted { room_id, .. }
        | Event::ReminderMarked { room_id, .. }
        | Event::CalendarRefSet { room_id, .. } => vec![*room_id],
        Event::RoomUpdated { id, .. } => vec![*id],
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => vec![],
    }
}

impl Store {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            rooms: DashMap::new(),
            booking_to_room: DashMap::new(),
            wal_tx,
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // Never blocking_write here: this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated {
                    id,
                    name,
                    location,
                    capacity,
                } => {
                    let room = Room {
                        id: *id,
                        name: name.clone(),
                        location: location.clone(),
                        capacity: *capacity,
                    };
                    store.rooms.insert(*id, Arc::new(RwLock::new(RoomState::new(room))));
                }
                Event::RoomDeleted { id } => {
                    store.rooms.remove(id);
                }
                other => {
                    for room_id in event_rooms(other) {
                        let Some(rs) = store.get_room_state(&room_id) else {
                            continue;
                        };
                        let Ok(mut guard) = rs.try_write() else {
                            return Err(io::Error::other("replay: room state contended"));
                        };
                        apply_to_room(&mut guard, other, &store.booking_to_room);
                    }
                }
            }
        }

        tracing::debug!(
            "store replayed {} events: {} rooms, {} bookings",
            events.len(),
            store.rooms.len(),
            store.booking_to_room.len()
        );
        Ok(store)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub(super) fn get_room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_for_booking(&self, id: &BookingId) -> Option<RoomId> {
        self.booking_to_room.get(id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's lock.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        Ok(())
    }

    /// Lookup booking → room, acquire that room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &BookingId,
    ) -> Result<(RoomId, tokio::sync::OwnedRwLockWriteGuard<RoomState>), StoreError> {
        let room_id = self.room_for_booking(id).ok_or(StoreError::NotFound(*id))?;
        let rs = self.get_room_state(&room_id).ok_or(StoreError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }
}

// ── Collaborator trait impls ─────────────────────────────

#[async_trait]
impl StorageReader for Store {
    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.get_room(id).await)
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.get_booking(id).await)
    }

    async fn bookings_overlapping(&self, room_id: RoomId, window: Span) -> Result<Vec<Booking>, StoreError> {
        self.list_bookings(room_id, window).await
    }

    async fn bookings_due_for_reminder(&self, window: Span) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect_due_reminders(window).await)
    }
}

#[async_trait]
impl StorageWriter for Store {
    async fn create_room(&self, room: Room) -> Result<(), StoreError> {
        self.insert_room(room).await
    }

    async fn update_room(&self, id: RoomId, patch: RoomPatch) -> Result<Room, StoreError> {
        self.patch_room(id, patch).await
    }

    async fn delete_room(&self, id: RoomId) -> Result<(), StoreError> {
        self.remove_room(id).await
    }

    async fn create(&self, booking: Booking) -> Result<BookingId, StoreError> {
        self.insert_booking(booking).await
    }

    async fn update(&self, booking: Booking) -> Result<Booking, StoreError> {
        self.replace_booking(booking).await
    }

    async fn delete(&self, id: BookingId) -> Result<Booking, StoreError> {
        self.remove_booking(id).await
    }

    async fn mark_reminder_sent(&self, id: BookingId, reminded_start: Ms) -> Result<(), StoreError> {
        self.flag_reminder(id, reminded_start).await
    }

    async fn set_calendar_ref(&self, id: BookingId, calendar_ref: Option<String>) -> Result<(), StoreError> {
        self.store_calendar_ref(id, calendar_ref).await
    }
}
