//! Run lifecycle orchestration.
//!
//! The [`Orchestrator`] is the single entry point for submitting runs,
//! querying them, and fetching their artifacts. Callers hand it an
//! already-resolved [`Actor`]; every read and mutation here is scoped
//! to that actor's ownership coordinates.

pub mod executor;
pub mod pool;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::actor::Actor;
use crate::artifacts::{run_dir_name, ArtifactStore};
use crate::broadcast::{ProgressBroadcaster, ProgressEvent};
use crate::db::progress_repo::ProgressRow;
use crate::db::run_repo::RunRow;
use crate::db::{format_timestamp, progress_repo, run_repo, voucher_repo, Database};
use crate::engine::EngineFactory;
use crate::error::{AuthError, Result, ScribegateError, WorkerError};
use crate::secrets::CredentialEncryptor;

use pool::{RunJob, RunWorkerPool, WorkerContext};

/// Longest accepted topic, in characters.
const MAX_TOPIC_LEN: usize = 300;

pub struct Orchestrator {
    db: Database,
    store: ArtifactStore,
    broadcaster: ProgressBroadcaster,
    pool: RunWorkerPool,
    max_active_per_owner: u64,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        store: ArtifactStore,
        factory: Arc<dyn EngineFactory>,
        encryptor: Option<Arc<CredentialEncryptor>>,
        worker_count: usize,
        max_active_per_owner: u64,
    ) -> Self {
        let broadcaster = ProgressBroadcaster::default();
        let ctx = WorkerContext {
            db: db.clone(),
            store: store.clone(),
            broadcaster: broadcaster.clone(),
            factory,
            encryptor,
        };
        Self {
            db,
            store,
            broadcaster,
            pool: RunWorkerPool::new(ctx, worker_count),
            max_active_per_owner,
        }
    }

    /// Submits a new run for the actor and queues it for execution.
    pub fn submit(&self, actor: &Actor, topic: &str) -> Result<RunRow> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ScribegateError::validation("topic must not be empty"));
        }
        if topic.chars().count() > MAX_TOPIC_LEN {
            return Err(ScribegateError::validation(format!(
                "topic must be at most {} characters",
                MAX_TOPIC_LEN
            )));
        }

        // Admission re-reads the live voucher row; a still-valid token
        // must not create a job for a voucher that is already spent.
        if let Actor::Voucher(voucher) = actor {
            let current = voucher_repo::find_by_id(&self.db, voucher.id)?
                .ok_or(ScribegateError::Auth(AuthError::VoucherNotFound))?;
            if current.remaining_runs() == 0 {
                return Err(ScribegateError::Auth(AuthError::QuotaExhausted));
            }
        }

        let owner_type = actor.owner_type();
        let owner_id = actor.owner_id();
        let active = run_repo::count_active_for_owner(&self.db, owner_type.as_str(), owner_id)?;
        if active >= self.max_active_per_owner {
            return Err(ScribegateError::validation(format!(
                "already {} active runs, wait for one to finish",
                active
            )));
        }

        let run_id = run_repo::insert(
            &self.db,
            topic,
            owner_type.as_str(),
            owner_id,
            &format_timestamp(Utc::now()),
        )?;
        let run_dir = run_dir_name(owner_type, actor.owner_identifier(), run_id, topic);
        run_repo::set_output_dir(&self.db, run_id, &run_dir)?;

        let job = RunJob {
            run_id,
            topic: topic.to_string(),
            owner_type,
            owner_id,
            run_dir,
        };
        if let Err(e) = self.pool.submit(job) {
            let reason = match e {
                WorkerError::QueueFull => "run queue is full",
                WorkerError::ChannelClosed => "run queue unavailable",
            };
            run_repo::mark_failed(&self.db, run_id, reason, &format_timestamp(Utc::now()))?;
            return Err(e.into());
        }

        log::info!(
            "Queued run {} for {} {} ({})",
            run_id,
            owner_type,
            owner_id,
            topic
        );
        self.run_row(run_id)
    }

    /// Current state of a run the actor owns.
    pub fn status_of(&self, actor: &Actor, run_id: i64) -> Result<RunRow> {
        self.owned_run(actor, run_id)
    }

    /// Persisted progress trail of a run the actor owns.
    pub fn progress_of(&self, actor: &Actor, run_id: i64) -> Result<Vec<ProgressRow>> {
        self.owned_run(actor, run_id)?;
        Ok(progress_repo::list_for_run(&self.db, run_id)?)
    }

    /// Live progress subscription for a run the actor owns.
    pub fn subscribe(
        &self,
        actor: &Actor,
        run_id: i64,
    ) -> Result<broadcast::Receiver<ProgressEvent>> {
        self.owned_run(actor, run_id)?;
        Ok(self.broadcaster.subscribe(run_id))
    }

    /// All runs visible to the actor, most recent first. Admins see
    /// every run; vouchers see only their own.
    pub fn history_for(&self, actor: &Actor) -> Result<Vec<RunRow>> {
        if actor.is_admin() {
            return Ok(run_repo::list_all(&self.db)?);
        }
        Ok(run_repo::list_for_owner(
            &self.db,
            actor.owner_type().as_str(),
            actor.owner_id(),
        )?)
    }

    /// Resolves an artifact of a completed run the actor owns. Any
    /// denial (wrong name, traversal, unfinished run, missing file)
    /// surfaces as NotFound.
    pub fn artifact_path(&self, actor: &Actor, run_id: i64, filename: &str) -> Result<PathBuf> {
        let run = self.owned_run(actor, run_id)?;
        if run.status != "completed" {
            return Err(ScribegateError::not_found("artifact"));
        }
        let run_dir = run
            .output_dir
            .ok_or(ScribegateError::not_found("artifact"))?;
        self.store.resolve(&run_dir, filename)
    }

    /// Deletes a run along with its artifacts and progress trail, and
    /// returns the removed record. A running run may be deleted too;
    /// the worker's remaining updates then land on no rows. The owner
    /// directory is pruned when the deletion empties it.
    pub fn delete(&self, actor: &Actor, run_id: i64) -> Result<RunRow> {
        let run = self.owned_run(actor, run_id)?;

        if let Some(ref run_dir) = run.output_dir {
            let dir = self.store.root().join(run_dir);
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    log::warn!("Could not remove artifacts of run {}: {}", run_id, e);
                }
            }
            // remove_dir refuses non-empty directories, which is the
            // behavior we want for the shared owner directory.
            if let Some(parent) = dir.parent() {
                if parent != self.store.root() {
                    let _ = std::fs::remove_dir(parent);
                }
            }
        }
        if !run_repo::delete(&self.db, run_id)? {
            return Err(ScribegateError::not_found("run"));
        }
        log::info!("Deleted run {}", run_id);
        Ok(run)
    }

    /// Stops accepting new runs and waits for in-flight ones.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }

    fn run_row(&self, run_id: i64) -> Result<RunRow> {
        run_repo::find_by_id(&self.db, run_id)?.ok_or(ScribegateError::not_found("run"))
    }

    /// Loads a run and enforces ownership. Admins may access any run;
    /// for everyone else, a run that exists but belongs to someone else
    /// is NotOwner, not NotFound: ownership of run IDs is not secret,
    /// artifact contents are.
    fn owned_run(&self, actor: &Actor, run_id: i64) -> Result<RunRow> {
        let run = self.run_row(run_id)?;
        if actor.is_admin() {
            return Ok(run);
        }
        let owner_type = crate::actor::OwnerType::parse(&run.owner_type)
            .ok_or(ScribegateError::not_found("run"))?;
        if !actor.owns(owner_type, run.owner_id) {
            return Err(ScribegateError::Auth(AuthError::NotOwner));
        }
        Ok(run)
    }
}
