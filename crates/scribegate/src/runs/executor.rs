//! Run execution — the stage progression a worker drives a run through.
//!
//! Execution never returns an error to the pool; every failure mode
//! lands in the run row and the progress trail instead. Voucher quota
//! is consumed only after artifacts are verified, so a failed run
//! never costs the holder anything.

use chrono::Utc;

use crate::actor::OwnerType;
use crate::artifacts::ARTIFACT_ARTICLE;
use crate::broadcast::{ProgressEvent, ProgressRecorder, ProgressSink};
use crate::db::{format_timestamp, run_repo, voucher_repo};
use crate::engine::{EngineError, EngineRequest, EngineSettings};

use super::pool::{RunJob, WorkerContext};

/// Stage names written to `runs.current_stage` and progress events.
pub const STAGE_INITIALIZING: &str = "INITIALIZING";
pub const STAGE_SETUP_COMPLETE: &str = "SETUP_COMPLETE";
pub const STAGE_RUNNER_INITIALIZED: &str = "RUNNER_INITIALIZED";
pub const STAGE_PROCESSING: &str = "PROCESSING";
pub const STAGE_PROCESSING_DONE: &str = "PROCESSING_DONE";
pub const STAGE_POST_PROCESSING_FAILED: &str = "POST_PROCESSING_FAILED";
pub const STAGE_FINALIZING: &str = "FINALIZING";
pub const STAGE_COMPLETED: &str = "COMPLETED";
pub const STAGE_FAILED: &str = "FAILED";

/// Drives one run to a terminal state.
pub fn execute(ctx: &WorkerContext, job: &RunJob) {
    let recorder = ProgressRecorder::new(job.run_id, ctx.broadcaster.clone());

    let outcome = run_stages(ctx, job, &recorder);

    if let Err(message) = outcome {
        log::warn!("Run {} failed: {}", job.run_id, message);
        recorder.report(ProgressEvent::error(job.run_id, STAGE_FAILED, &message));
        if let Err(e) =
            run_repo::mark_failed(&ctx.db, job.run_id, &message, &format_timestamp(Utc::now()))
        {
            log::error!("Failed to record failure for run {}: {}", job.run_id, e);
        }
    }

    if let Err(e) = recorder.flush(&ctx.db) {
        log::error!("Failed to flush progress for run {}: {}", job.run_id, e);
    }
    ctx.broadcaster.close(job.run_id);
}

/// The happy path, stage by stage. Any `Err` carries the user-facing
/// failure message.
fn run_stages(
    ctx: &WorkerContext,
    job: &RunJob,
    recorder: &ProgressRecorder,
) -> Result<(), String> {
    run_repo::mark_running(&ctx.db, job.run_id, STAGE_INITIALIZING)
        .map_err(|e| format!("could not start run: {}", e))?;
    recorder.report(ProgressEvent::new(
        job.run_id,
        STAGE_INITIALIZING,
        "Preparing run",
        0,
    ));

    // Admission is re-checked at execution time: the voucher may have
    // been spent or revoked while this run sat in the queue.
    if job.owner_type == OwnerType::Voucher {
        check_voucher_still_eligible(ctx, job.owner_id)?;
    }

    let settings = EngineSettings::resolve(&ctx.db, ctx.encryptor.as_deref())
        .map_err(|e| format!("could not resolve engine settings: {}", e))?;
    advance(ctx, job, recorder, STAGE_SETUP_COMPLETE, "Settings resolved", 10)?;

    let mut handle = ctx
        .factory
        .create(&settings)
        .map_err(|e| e.to_string())?;
    advance(
        ctx,
        job,
        recorder,
        STAGE_RUNNER_INITIALIZED,
        "Engine ready",
        20,
    )?;

    let output_dir = ctx
        .store
        .create_run_dir(&job.run_dir)
        .map_err(|e| format!("could not create output directory: {}", e))?;

    advance(ctx, job, recorder, STAGE_PROCESSING, "Generating content", 30)?;
    let request = EngineRequest {
        run_id: job.run_id,
        topic: job.topic.clone(),
        output_dir: output_dir.clone(),
    };
    handle
        .generate(&request, recorder)
        .map_err(|e| e.to_string())?;
    advance(
        ctx,
        job,
        recorder,
        STAGE_PROCESSING_DONE,
        "Generation finished",
        80,
    )?;

    // Best-effort post-processing: a failure here is recorded in the
    // stage and trail but never fails the run.
    if let Err(e) = handle.post_process(&request, recorder) {
        log::warn!("Post-processing failed for run {}: {}", job.run_id, e);
        let _ = run_repo::update_stage(&ctx.db, job.run_id, STAGE_POST_PROCESSING_FAILED);
        recorder.report(ProgressEvent::warning(
            job.run_id,
            STAGE_POST_PROCESSING_FAILED,
            &e.to_string(),
            80,
        ));
    }

    // Verified completion: the engine must actually have produced the
    // primary artifact before anything is billed or reported done.
    if !output_dir.join(ARTIFACT_ARTICLE).is_file() {
        return Err(EngineError::MissingArtifact(ARTIFACT_ARTICLE).to_string());
    }

    advance(ctx, job, recorder, STAGE_FINALIZING, "Finalizing", 90)?;
    if job.owner_type == OwnerType::Voucher {
        let consumed =
            voucher_repo::increment_usage(&ctx.db, job.owner_id, &format_timestamp(Utc::now()))
                .map_err(|e| format!("could not record voucher usage: {}", e))?;
        if !consumed {
            // Another run of the same voucher won the last slot while
            // this one was executing. The artifacts are discarded so
            // quota stays an upper bound on delivered work.
            if let Err(e) = std::fs::remove_dir_all(&output_dir) {
                log::warn!(
                    "Could not remove artifacts of over-quota run {}: {}",
                    job.run_id,
                    e
                );
            }
            return Err("voucher has no remaining runs".to_string());
        }
    }

    run_repo::mark_completed(&ctx.db, job.run_id, &format_timestamp(Utc::now()))
        .map_err(|e| format!("could not record completion: {}", e))?;
    recorder.report(ProgressEvent::success(
        job.run_id,
        STAGE_COMPLETED,
        "Run completed",
    ));
    log::info!("Run {} completed", job.run_id);
    Ok(())
}

fn advance(
    ctx: &WorkerContext,
    job: &RunJob,
    recorder: &ProgressRecorder,
    stage: &str,
    message: &str,
    progress: u8,
) -> Result<(), String> {
    run_repo::update_stage(&ctx.db, job.run_id, stage)
        .map_err(|e| format!("could not update stage: {}", e))?;
    recorder.report(ProgressEvent::new(job.run_id, stage, message, progress));
    Ok(())
}

fn check_voucher_still_eligible(ctx: &WorkerContext, voucher_id: i64) -> Result<(), String> {
    let voucher = voucher_repo::find_by_id(&ctx.db, voucher_id)
        .map_err(|e| format!("could not load voucher: {}", e))?
        .ok_or_else(|| "voucher not found".to_string())?;
    if !voucher.is_active {
        return Err("voucher inactive".to_string());
    }
    if voucher.remaining_runs() == 0 {
        return Err("voucher has no remaining runs".to_string());
    }
    Ok(())
}
