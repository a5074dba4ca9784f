mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    DayCell, DayStatus, booked_count, compute_saturated_ranges, day_status, free_ranges,
    is_date_fully_booked, merge_overlapping, month_range, month_view, subtract_ranges,
};
pub use conflict::{
    ConflictReason, check_dates, check_stay, find_conflict, is_blocking, is_day_blocked,
    is_range_blocked,
};
pub use error::EngineError;
pub use queries::BookingFilter;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
///
/// A non-append command found while draining is handled after the batch is flushed,
/// so it observes every append queued before it.
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
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes don't ride along with the
    // next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Site-wide state that does not belong to a single room.
#[derive(Debug, Default)]
pub(super) struct SiteState {
    pub(super) settings: SiteSettings,
    pub(super) content: HashMap<Ulid, ContentEntry>,
}

/// In-process reference backend: rooms, their bookings and blocks, site content and
/// settings. Every change is written to the WAL before it becomes visible.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) slugs: DashMap<String, Ulid>,
    /// Reverse lookup: booking or block id → room id
    pub(super) entity_to_room: DashMap<Ulid, Ulid>,
    /// Room creation takes this shared, compaction takes it exclusively.
    pub(super) site: RwLock<SiteState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a room-scoped event to a RoomState (no locking — caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => rs.room = room.clone(),
        Event::RoomActiveSet { active, .. } => rs.room.is_active = *active,
        Event::BlockAdded { block } => {
            rs.insert_interval(block.calendar_event());
            rs.blocks.push(block.clone());
            entity_map.insert(block.id, block.room_id);
        }
        Event::BlockRemoved { id, .. } => {
            rs.remove_interval(*id);
            rs.blocks.retain(|b| b.id != *id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            rs.insert_interval(booking.calendar_event());
            rs.bookings.push(booking.clone());
            entity_map.insert(booking.id, booking.room_id);
        }
        Event::BookingStatusChanged {
            id,
            booking_status,
            payment_status,
            ..
        } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.booking_status = *booking_status;
                booking.payment_status = *payment_status;
                let event = booking.calendar_event();
                rs.remove_interval(*id);
                rs.insert_interval(event);
            }
        }
        // Creation is handled at the DashMap level; the rest is site-wide.
        Event::RoomCreated { .. }
        | Event::ContentUpserted { .. }
        | Event::ContentDeleted { .. }
        | Event::MaintenanceSet { .. }
        | Event::SmtpConfigSet { .. }
        | Event::AdminContactSet { .. } => {}
    }
}

/// Apply a site-wide event (content or settings).
fn apply_to_site(site: &mut SiteState, event: &Event) {
    match event {
        Event::ContentUpserted { entry } => {
            site.content.insert(entry.id, entry.clone());
        }
        Event::ContentDeleted { id } => {
            site.content.remove(id);
        }
        Event::MaintenanceSet { enabled, message } => {
            site.settings.maintenance = MaintenanceMode {
                enabled: *enabled,
                message: message.clone(),
            };
        }
        Event::SmtpConfigSet { config } => site.settings.smtp = Some(config.clone()),
        Event::AdminContactSet { contact } => site.settings.admin_contact = Some(contact.clone()),
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain owned state, then publish it behind the locks.
        let entity_to_room = DashMap::new();
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        let mut site = SiteState::default();
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    rooms.insert(room.id, RoomState::new(room.clone()));
                }
                other => match other.room_id() {
                    Some(room_id) => {
                        if let Some(rs) = rooms.get_mut(&room_id) {
                            apply_to_room(rs, other, &entity_to_room);
                        }
                    }
                    None => apply_to_site(&mut site, other),
                },
            }
        }

        let slugs = DashMap::new();
        let state = DashMap::new();
        for (id, rs) in rooms {
            slugs.insert(rs.room.slug.clone(), id);
            state.insert(id, Arc::new(RwLock::new(rs)));
        }
        info!(
            path = %wal_path.display(),
            events = events.len(),
            rooms = state.len(),
            "engine state replayed"
        );

        Ok(Self {
            rooms: state,
            slugs,
            entity_to_room,
            site: RwLock::new(site),
            wal_tx,
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn room_state(&self, id: Ulid) -> Result<SharedRoomState, EngineError> {
        self.get_room(&id).ok_or(EngineError::NotFound(id))
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        room_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.entity_to_room);
        self.notify.send(room_id, event);
        Ok(())
    }

    /// Same as [`Engine::persist_and_apply`] for site-wide events.
    pub(super) async fn persist_and_apply_site(
        &self,
        site: &mut SiteState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_site(site, event);
        self.notify.send_site(event);
        Ok(())
    }

    /// Lookup entity → room, get room, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self.room_state(room_id)?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }
}
