//! C3: Job Pipeline. Runs one claimed job from MetadataFetch through a
//! terminal state (Completed / Failed / Discarded), reporting exactly once
//! to the coordinator and unconditionally cleaning up its workspace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capability::CapabilitySet;
use crate::coordinator::{CoordinatorClient, JobDescriptor, UPLOAD_RETRY_BASE};
use crate::origin::OriginClient;
use crate::progress::ProgressTracker;
use crate::subprocess::SupervisedProcess;
use crate::workspace::JobWorkspace;

/// Progress reports faster than this are coalesced (dropped) so the
/// coordinator isn't flooded; the final 100% sample is always delivered.
const PROGRESS_COALESCE_INTERVAL: Duration = Duration::from_millis(500);

/// Shared, read-only inputs every job pipeline task needs. Cloned cheaply
/// (an `Arc` internally) into each spawned task, no module-level singleton.
#[derive(Clone)]
pub struct PipelineContext {
    pub coordinator: CoordinatorClient,
    pub origin: Arc<OriginClient>,
    pub capabilities: Arc<CapabilitySet>,
    pub ffmpeg_program: Arc<str>,
    pub temp_dir: Arc<std::path::Path>,
    pub upload_retries: u32,
    /// Cancelled when the worker is shutting down; checked between steps and
    /// inside the encode loop so in-flight jobs wind down promptly.
    pub shutdown: CancellationToken,
}

#[derive(Debug)]
enum Terminal {
    Completed,
    Discarded,
    Failed(String),
}

/// Runs `job` to completion. Never panics on ordinary failure paths: every
/// branch reaches exactly one terminal report (or none, for Discarded /
/// shutdown) and always cleans up the workspace.
pub async fn run_job(job: JobDescriptor, ctx: PipelineContext) {
    let job_id = job.job_id.clone();
    let workspace = JobWorkspace::new(&ctx.temp_dir, &job_id);

    let terminal = run_job_inner(&job, &workspace, &ctx).await;

    match &terminal {
        Terminal::Completed => {
            info!(job_id = %job_id, "job completed");
        }
        Terminal::Discarded => {
            info!(job_id = %job_id, "job discarded (cancelled or superseded)");
        }
        Terminal::Failed(cause) => {
            warn!(job_id = %job_id, cause = %cause, "job failed");
            ctx.coordinator.report_error(&job_id, cause).await;
        }
    }

    workspace.cleanup().await;
}

async fn run_job_inner(
    job: &JobDescriptor,
    workspace: &JobWorkspace,
    ctx: &PipelineContext,
) -> Terminal {
    if ctx.shutdown.is_cancelled() {
        return Terminal::Discarded;
    }

    // 1. MetadataFetch
    let metadata = match ctx
        .origin
        .fetch_metadata(&job.origin, &job.media_rating_key)
        .await
    {
        Ok(metadata) => metadata,
        Err(err) => return Terminal::Failed(format!("metadata_incomplete: {err}")),
    };

    if ctx.shutdown.is_cancelled() {
        return Terminal::Discarded;
    }

    // 2. Download
    if let Err(err) = ctx
        .origin
        .download(&job.origin, &metadata.part_key, &workspace.input_path)
        .await
    {
        return Terminal::Failed(format!("download failed: {err}"));
    }

    if ctx.shutdown.is_cancelled() {
        return Terminal::Discarded;
    }

    // 3. Encode
    let encode_outcome = run_encode(job, workspace, metadata.duration_seconds, ctx).await;
    let encode_outcome = match encode_outcome {
        Ok(outcome) => outcome,
        Err(err) => return Terminal::Failed(format!("encode_failed: {err}")),
    };

    match encode_outcome {
        EncodeOutcome::Cancelled => return Terminal::Discarded,
        EncodeOutcome::Success => {}
    }

    // 4. Upload
    upload_with_retries(job, workspace, ctx).await
}

enum EncodeOutcome {
    Success,
    /// Either the coordinator cancelled the job (`report_progress` returned
    /// `false`) or the worker is shutting down.
    Cancelled,
}

fn build_encode_args(
    input_path: &std::path::Path,
    output_path: &std::path::Path,
    encoder: &str,
    resolution_height: u32,
    max_bitrate: u32,
) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input_path.display().to_string(),
        "-c:v".to_string(),
        encoder.to_string(),
        "-vf".to_string(),
        format!("scale=-2:{resolution_height}"),
        "-b:v".to_string(),
        format!("{max_bitrate}k"),
        "-progress".to_string(),
        "pipe:2".to_string(),
        output_path.display().to_string(),
    ]
}

async fn run_encode(
    job: &JobDescriptor,
    workspace: &JobWorkspace,
    duration_seconds: f64,
    ctx: &PipelineContext,
) -> std::io::Result<EncodeOutcome> {
    let encoder = ctx.capabilities.preferred_encoder();
    let args = build_encode_args(
        &workspace.input_path,
        &workspace.output_path,
        encoder,
        job.resolution_height,
        job.max_bitrate,
    );

    let mut cmd = Command::new(ctx.ffmpeg_program.as_ref());
    cmd.args(&args);
    let mut proc = SupervisedProcess::spawn(cmd)?;

    let total_duration = if duration_seconds > 0.0 {
        Some(duration_seconds)
    } else {
        None
    };
    let mut tracker = ProgressTracker::new(total_duration);
    let mut last_report = Instant::now() - PROGRESS_COALESCE_INTERVAL;
    let mut cancelled = false;

    loop {
        if ctx.shutdown.is_cancelled() {
            let _ = proc.cancel();
            cancelled = true;
            break;
        }

        tokio::select! {
            line = proc.next_stderr_line() => {
                let Some(line) = line else {
                    break;
                };
                if let Some(sample) = tracker.observe_line(&line) {
                    let due = sample.percent_complete >= 100.0
                        || last_report.elapsed() >= PROGRESS_COALESCE_INTERVAL;
                    if due {
                        last_report = Instant::now();
                        let keep_going = ctx.coordinator.report_progress(&job.job_id, sample).await;
                        if !keep_going {
                            let _ = proc.cancel();
                            cancelled = true;
                        }
                    }
                }
            }
            _ = ctx.shutdown.cancelled() => {
                let _ = proc.cancel();
                cancelled = true;
            }
        }

        if cancelled {
            break;
        }
    }

    let status = proc.wait().await?;

    if cancelled {
        return Ok(EncodeOutcome::Cancelled);
    }
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "encoder exited with status {status}"
        )));
    }
    Ok(EncodeOutcome::Success)
}

async fn upload_with_retries(
    job: &JobDescriptor,
    workspace: &JobWorkspace,
    ctx: &PipelineContext,
) -> Terminal {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match ctx
            .coordinator
            .upload_complete(&job.job_id, &workspace.output_path)
            .await
        {
            Ok(()) => return Terminal::Completed,
            Err(crate::error::CoordinatorError::Gone) => return Terminal::Discarded,
            Err(err) => {
                if attempt >= ctx.upload_retries {
                    return Terminal::Failed(format!("upload failed after {attempt} attempts: {err}"));
                }
                warn!(job_id = %job.job_id, attempt, error = %err, "upload failed, retrying");
                tokio::time::sleep(UPLOAD_RETRY_BASE * attempt).await;
            }
        }
    }
}
