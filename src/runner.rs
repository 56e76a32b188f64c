//! C4: Runner / Supervisor. The long-lived loop: registration with backoff,
//! periodic poll and heartbeat timers, concurrency cap, graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capability::{self, CapabilitySet};
use crate::config::WorkerConfig;
use crate::coordinator::{CoordinatorClient, REGISTER_RETRY_BACKOFF};
use crate::error::CoordinatorError;
use crate::origin::OriginClient;
use crate::pipeline::{self, PipelineContext};
use crate::workspace;

const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";

/// Mutable mapping from `job_id` to the handle of its running pipeline task.
/// Exclusively owned by the Runner; mutated only on job start/finish and on
/// shutdown (section 3, Active Job Table).
type ActiveJobTable = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

pub struct Runner {
    config: WorkerConfig,
    coordinator: CoordinatorClient,
    origin: Arc<OriginClient>,
    active_jobs: ActiveJobTable,
    shutdown: CancellationToken,
    ffmpeg_program: Arc<str>,
}

impl Runner {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_ffmpeg_program(config, DEFAULT_FFMPEG_PROGRAM)
    }

    /// Builds a Runner against an explicit ffmpeg-compatible executable,
    /// rather than the default `ffmpeg` resolved from `PATH`. Exists so
    /// integration tests can substitute a mock encoder binary without a
    /// module-level override (section 9, Global-ish configuration).
    pub fn with_ffmpeg_program(config: WorkerConfig, ffmpeg_program: impl Into<Arc<str>>) -> Self {
        let coordinator = CoordinatorClient::new(
            config.server_url.clone(),
            config.worker_id.clone(),
            config.worker_name.clone(),
            config.worker_key.clone(),
        );
        let origin = Arc::new(OriginClient::new(config.tls_verify_origin));
        Runner {
            config,
            coordinator,
            origin,
            active_jobs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            ffmpeg_program: ffmpeg_program.into(),
        }
    }

    /// Runs the worker until SIGTERM/SIGINT triggers a clean shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        // Startup sequence (section 4.4).
        workspace::ensure_temp_dir(&self.config.temp_dir).await?;

        let capabilities = capability::detect(&self.ffmpeg_program).await;
        info!(
            gpu_label = %capabilities.gpu_label,
            encoders = ?capabilities.encoders,
            "capability probe complete"
        );
        let capabilities = Arc::new(capabilities);

        self.register_with_backoff(&capabilities).await;

        let ctx = PipelineContext {
            coordinator: self.coordinator.clone(),
            origin: self.origin.clone(),
            capabilities,
            ffmpeg_program: self.ffmpeg_program.clone(),
            temp_dir: Arc::from(self.config.temp_dir.as_path()),
            upload_retries: self.config.upload_retries,
            shutdown: self.shutdown.clone(),
        };

        let poll_task = self.spawn_poll_loop(ctx);
        let heartbeat_task = self.spawn_heartbeat_loop();
        let signal_task = self.spawn_signal_listener();

        tokio::select! {
            _ = poll_task => {}
            _ = heartbeat_task => {}
            _ = signal_task => {}
        }

        self.shutdown().await;
        Ok(())
    }

    async fn register_with_backoff(&self, capabilities: &CapabilitySet) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.coordinator.register(capabilities).await {
                Ok(()) => {
                    info!(attempt, "registered with coordinator");
                    return;
                }
                Err(CoordinatorError::Auth { status }) => {
                    // Not special-cased: surfaces as a failed register, worker
                    // keeps retrying; the operator must notice in logs.
                    error!(status, attempt, "coordinator rejected worker key, retrying anyway");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "registration failed, retrying in 10s");
                }
            }
            tokio::time::sleep(REGISTER_RETRY_BACKOFF).await;
        }
    }

    fn spawn_poll_loop(&self, ctx: PipelineContext) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let active_jobs = self.active_jobs.clone();
        let shutdown = self.shutdown.clone();
        let max_concurrent = self.config.max_concurrent;
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            // Fire an immediate first poll so cold starts aren't gated on the
            // first tick.
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.cancelled() => break,
                }

                if shutdown.is_cancelled() {
                    break;
                }

                let active_count = active_jobs.lock().await.len();
                if active_count >= max_concurrent {
                    continue;
                }

                match coordinator.claim_job().await {
                    Ok(Some(job)) => {
                        let job_id = job.job_id.clone();
                        let ctx = ctx.clone();
                        let table = active_jobs.clone();
                        let handle = tokio::spawn(async move {
                            pipeline::run_job(job, ctx).await;
                        });
                        active_jobs.lock().await.insert(job_id.clone(), handle);
                        // Reap the entry once the pipeline task finishes so the
                        // table's size stays an accurate concurrency count.
                        let reap_table = table;
                        tokio::spawn(async move {
                            loop {
                                let done = {
                                    let guard = reap_table.lock().await;
                                    guard.get(&job_id).map(|h| h.is_finished())
                                };
                                match done {
                                    Some(true) | None => {
                                        reap_table.lock().await.remove(&job_id);
                                        break;
                                    }
                                    Some(false) => {
                                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                                    }
                                }
                            }
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "claim_job failed, retrying next tick");
                    }
                }
            }
        })
    }

    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let active_jobs = self.active_jobs.clone();
        let shutdown = self.shutdown.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                let active_count = active_jobs.lock().await.len();
                coordinator.heartbeat(active_count).await;
            }
        })
    }

    fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        })
    }

    async fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            let remaining: Vec<JoinHandle<()>> = {
                let mut guard = self.active_jobs.lock().await;
                guard.drain().map(|(_, handle)| handle).collect()
            };
            if remaining.is_empty() || tokio::time::Instant::now() >= deadline {
                for handle in remaining {
                    handle.abort();
                }
                break;
            }
            let _ = tokio::time::timeout_at(
                deadline,
                futures_util::future::join_all(remaining),
            )
            .await;
        }

        workspace::sweep_temp_dir(&self.config.temp_dir).await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
