mod accounts;
mod admin;
mod board;
mod booking;
mod error;
mod ledger;
mod maintenance;
mod schedule;
mod slots;
mod store;
mod waitlist;

pub use admin::VenueInput;
pub use error::{EngineError, ErrorKind};
pub use store::Tables;
pub use waitlist::select_next;

use std::io;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;
use store::Undo;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Commit, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => batch.push((commit, response)),
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

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes never leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
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
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { commit, response } => {
            let result = wal.append_buffered(&commit).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

// ── Transactions ─────────────────────────────────────────

/// Position inside a transaction that later work can be rolled back to.
#[derive(Debug, Clone, Copy)]
pub struct Savepoint {
    events: usize,
    undo: usize,
}

/// One unit of work against the tables. Every change goes through
/// [`Txn::apply`], which updates the tables immediately and records both the
/// event (for the WAL) and its undo entries (for rollback).
pub struct Txn<'a> {
    tables: &'a mut Tables,
    config: &'a EngineConfig,
    now: NaiveDateTime,
    events: Vec<Event>,
    undo: Vec<Undo>,
}

impl<'a> Txn<'a> {
    fn new(tables: &'a mut Tables, config: &'a EngineConfig, now: NaiveDateTime) -> Self {
        Self {
            tables,
            config,
            now,
            events: Vec::new(),
            undo: Vec::new(),
        }
    }

    pub fn tables(&self) -> &Tables {
        self.tables
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    pub fn apply(&mut self, event: Event) {
        self.undo.extend(self.tables.apply(&event));
        self.events.push(event);
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            events: self.events.len(),
            undo: self.undo.len(),
        }
    }

    pub fn rollback_to(&mut self, sp: Savepoint) {
        let tail = self.undo.split_off(sp.undo);
        self.tables.rollback(tail);
        self.events.truncate(sp.events);
    }

    /// Run `f` behind a savepoint; its changes are discarded if it fails.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Txn<'a>) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let sp = self.savepoint();
        let result = f(self);
        if result.is_err() {
            self.rollback_to(sp);
        }
        result
    }

    fn finish(self) -> (Vec<Event>, Vec<Undo>) {
        (self.events, self.undo)
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    tables: RwLock<Tables>,
    wal_tx: mpsc::Sender<WalCommand>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    /// Held for the duration of a maintenance run.
    maintenance_gate: Mutex<()>,
}

impl Engine {
    /// Replay the WAL under `config.data_dir` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.wal_path();
        let commits = Wal::replay(&wal_path)?;

        let mut tables = Tables::new();
        let mut events = 0usize;
        for commit in &commits {
            for event in &commit.events {
                tables.apply(event);
                events += 1;
            }
        }
        info!(commits = commits.len(), events, path = %wal_path.display(), "replayed WAL");

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tables: RwLock::new(tables),
            wal_tx,
            config,
            clock,
            maintenance_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Write a commit through the background group-commit writer.
    async fn wal_append(&self, commit: Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { commit, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Run `f` as one transaction under the write lock. On success the staged
    /// events are made durable as a single WAL frame; on any error (including
    /// a failed WAL write) the tables are rolled back.
    pub(crate) async fn transact<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Txn<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut tables = self.tables.write().await;
        let now = self.clock.now();
        let mut txn = Txn::new(&mut *tables, &self.config, now);
        let result = f(&mut txn);
        let (events, undo) = txn.finish();

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                tables.rollback(undo);
                debug!(op, error = %e, "transaction rolled back");
                return Err(e);
            }
        };
        if events.is_empty() {
            return Ok(value);
        }
        let count = events.len();
        if let Err(e) = self.wal_append(Commit { at: now, events }).await {
            tables.rollback(undo);
            tracing::error!(op, error = %e, "commit failed, rolled back");
            return Err(e);
        }
        debug!(op, events = count, "committed");
        Ok(value)
    }

    /// Read-only access to the tables with the current time.
    pub(crate) async fn view<T>(&self, f: impl FnOnce(&Tables, NaiveDateTime) -> T) -> T {
        let tables = self.tables.read().await;
        f(&tables, self.clock.now())
    }

    /// Rewrite the WAL as a single snapshot commit of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Hold the read lock so no commit lands between snapshot and swap.
        let tables = self.tables.read().await;
        let snapshot = Commit {
            at: self.clock.now(),
            events: tables.snapshot(),
        };
        let events = snapshot.events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { snapshot, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events, "compacted WAL");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
