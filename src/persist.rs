//! Background persistence.
//!
//! The world never waits on storage: every change it wants recorded becomes a
//! [`PersistJob`] on an unbounded queue. One worker applies jobs in order and
//! retries failures with a linear backoff. Every job is a keyed upsert or
//! delete, so applying one twice is harmless.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::PersistenceConfig;
use crate::db::{Database, ItemPlacement, PersistError, PlayerSnapshot, WorldRecord};
use crate::item::ItemId;

#[derive(Debug, Clone, PartialEq)]
pub enum PersistJob {
    ReassignItems(Vec<ItemPlacement>),
    DeleteItems(Vec<ItemId>),
    SavePlayer(PlayerSnapshot),
    SaveWorld(WorldRecord),
}

impl PersistJob {
    fn label(&self) -> &'static str {
        match self {
            PersistJob::ReassignItems(_) => "reassign_items",
            PersistJob::DeleteItems(_) => "delete_items",
            PersistJob::SavePlayer(_) => "save_player",
            PersistJob::SaveWorld(_) => "save_world",
        }
    }

    async fn apply(&self, db: &Database) -> Result<(), PersistError> {
        match self {
            PersistJob::ReassignItems(placements) => db.reassign_items(placements).await,
            PersistJob::DeleteItems(ids) => db.delete_items(ids).await,
            PersistJob::SavePlayer(snapshot) => db.save_player(snapshot).await,
            PersistJob::SaveWorld(record) => db.save_world(record).await,
        }
    }
}

/// Sending half of the persistence queue.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl PersistQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PersistJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, job: PersistJob) {
        let label = job.label();
        if self.tx.send(job).is_err() {
            warn!("Persistence worker is gone, dropping {} job", label);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Apply one job, retrying up to `policy.max_attempts` times.
pub async fn apply_with_retry(db: &Database, job: &PersistJob, policy: RetryPolicy) -> Result<(), PersistError> {
    let mut attempt = 1;
    loop {
        match job.apply(db).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.max_attempts => {
                warn!("{} failed (attempt {}/{}): {}", job.label(), attempt, policy.max_attempts, e);
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Drain the queue until every sender is dropped.
pub async fn run_worker(db: Database, rx: mpsc::UnboundedReceiver<PersistJob>, policy: RetryPolicy) {
    run_worker_until(db, rx, policy, std::future::pending()).await
}

/// Like [`run_worker`], but once `stop` resolves the queue is closed to new
/// jobs and the worker exits after applying whatever was already queued.
pub async fn run_worker_until(
    db: Database,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
    policy: RetryPolicy,
    stop: impl Future<Output = ()>,
) {
    tokio::pin!(stop);
    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => apply_logged(&db, &job, policy).await,
                None => break,
            },
            _ = &mut stop => {
                rx.close();
                while let Some(job) = rx.recv().await {
                    apply_logged(&db, &job, policy).await;
                }
                break;
            }
        }
    }
    debug!("Persistence worker stopped");
}

async fn apply_logged(db: &Database, job: &PersistJob, policy: RetryPolicy) {
    match apply_with_retry(db, job, policy).await {
        Ok(()) => debug!("Applied {} job", job.label()),
        Err(e) => error!("Giving up on {} job after {} attempts: {}", job.label(), policy.max_attempts, e),
    }
}
