mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use slots::{compute_slots, SlotsError};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::Dispatcher;
use crate::wal::Wal;

pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

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
/// block on the first append, drain whatever else is already queued, write
/// the whole batch with a single fsync, then acknowledge every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush what we have
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch (these callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// One tenant's booking store: every business lives behind its own
/// `RwLock`, and that write lock is the storage-level exclusion guard for
/// booking commits.
pub struct Engine {
    pub state: DashMap<Ulid, SharedBusinessState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub dispatcher: Arc<Dispatcher>,
    /// Reverse lookup: entity (service/add-on/question/booking) id → business id.
    pub(super) entity_to_business: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a BusinessState (no locking — caller holds
/// the lock).
fn apply_to_business(bs: &mut BusinessState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BusinessUpdated { name, config, .. } => {
            bs.name = name.clone();
            bs.config = *config;
        }
        Event::HoursSet { weekday, hours, .. } => {
            bs.hours.set(*weekday, *hours);
        }
        Event::HoursCleared { weekday, .. } => {
            bs.hours.clear(*weekday);
        }
        Event::ServiceAdded { business_id, service } => {
            entity_map.insert(service.id, *business_id);
            bs.services.push(service.clone());
        }
        Event::ServiceRemoved { id, .. } => {
            bs.services.retain(|s| s.id != *id);
            entity_map.remove(id);
        }
        Event::AddOnAdded { business_id, add_on } => {
            entity_map.insert(add_on.id, *business_id);
            bs.add_ons.push(add_on.clone());
        }
        Event::AddOnRemoved { id, .. } => {
            bs.add_ons.retain(|o| o.id != *id);
            entity_map.remove(id);
        }
        Event::QuestionAdded { business_id, question } => {
            entity_map.insert(question.id, *business_id);
            bs.questions.push(question.clone());
        }
        Event::QuestionRemoved { id, .. } => {
            bs.questions.retain(|q| q.id != *id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            entity_map.insert(booking.id, booking.business_id);
            bs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = bs.find_booking_mut(*id) {
                booking.status = *status;
            }
        }
        // Created/Deleted are handled at the DashMap level, not here.
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, dispatcher: Arc<Dispatcher>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            dispatcher,
            entity_to_business: DashMap::new(),
        };

        // Replay — we are the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never blocking_write here: this may run inside
        // an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::BusinessCreated { id, name, config } => {
                    let bs = BusinessState::new(*id, name.clone(), *config);
                    engine.state.insert(*id, Arc::new(RwLock::new(bs)));
                }
                Event::BusinessDeleted { id } => {
                    engine.state.remove(id);
                }
                other => {
                    if let Some(business_id) = event_business_id(other)
                        && let Some(entry) = engine.state.get(&business_id) {
                            let bs = entry.value().clone();
                            let mut guard = bs.try_write().expect("replay: uncontended write");
                            apply_to_business(&mut guard, other, &engine.entity_to_business);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event through the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_business_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_business.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append then apply, while the caller holds the business lock. The
    /// commit point is the WAL acknowledgement.
    pub(super) async fn persist_and_apply(
        &self,
        bs: &mut BusinessState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_business(bs, event, &self.entity_to_business);
        Ok(())
    }

    /// Lookup entity → business, get the business, take the write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<BusinessState>), EngineError> {
        let business_id = self
            .get_business_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.write_owned().await;
        Ok((business_id, guard))
    }
}

/// Extract the business id from an event (for non-Create/Delete events).
fn event_business_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BusinessUpdated { id, .. } => Some(*id),
        Event::HoursSet { business_id, .. }
        | Event::HoursCleared { business_id, .. }
        | Event::ServiceAdded { business_id, .. }
        | Event::ServiceRemoved { business_id, .. }
        | Event::AddOnAdded { business_id, .. }
        | Event::AddOnRemoved { business_id, .. }
        | Event::QuestionAdded { business_id, .. }
        | Event::QuestionRemoved { business_id, .. }
        | Event::BookingStatusChanged { business_id, .. } => Some(*business_id),
        Event::BookingCreated { booking } => Some(booking.business_id),
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => None,
    }
}
