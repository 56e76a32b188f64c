//! C2: Coordinator Client. A typed request/response surface for register,
//! claim, progress, heartbeat, upload, and error-report, all authenticated by
//! the shared worker key.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::error::CoordinatorError;
use crate::progress::ProgressSample;

/// Credentials for reaching the upstream media server for one job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginCredentials {
    pub origin_base_url: String,
    pub origin_token: String,
}

/// A job as handed out by the coordinator on claim.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub media_rating_key: String,
    pub media_title: String,
    pub resolution_label: String,
    pub resolution_height: u32,
    pub max_bitrate: u32,
    pub origin: OriginCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClaimResponse {
    Job(JobDescriptor),
    Empty {},
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    worker_id: &'a str,
    worker_name: &'a str,
    encoders: &'a [String],
    gpu_label: &'a str,
}

#[derive(Serialize)]
struct ProgressRequest {
    percent_complete: f64,
    elapsed_seconds: f64,
    estimated_total_seconds: Option<f64>,
}

#[derive(Deserialize)]
struct ProgressResponse {
    /// `true` keeps transcoding, `false` means the coordinator cancelled the job.
    keep_going: bool,
}

#[derive(Serialize)]
struct HeartbeatRequest {
    active_count: usize,
}

#[derive(Serialize)]
struct ErrorReportRequest<'a> {
    message: &'a str,
}

/// A single shared async HTTP client (one connection pool), cloned cheaply
/// into every task that needs it.
#[derive(Clone)]
pub struct CoordinatorClient {
    http: Client,
    server_url: String,
    worker_id: String,
    worker_name: String,
    worker_key: String,
}

impl CoordinatorClient {
    pub fn new(server_url: String, worker_id: String, worker_name: String, worker_key: String) -> Self {
        let http = Client::builder()
            .build()
            .expect("coordinator http client builds with default TLS config");
        CoordinatorClient {
            http,
            server_url,
            worker_id,
            worker_name,
            worker_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-Worker-Key", &self.worker_key)
            .header("X-Worker-Id", &self.worker_id)
    }

    async fn interpret_status(resp: reqwest::Response) -> Result<reqwest::Response, CoordinatorError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CoordinatorError::Auth {
                status: status.as_u16(),
            });
        }
        if status == StatusCode::GONE {
            return Err(CoordinatorError::Gone);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoordinatorError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// One-shot. Caller retries `CoordinatorError::Transport` with backoff.
    pub async fn register(&self, capabilities: &CapabilitySet) -> Result<(), CoordinatorError> {
        let req = RegisterRequest {
            worker_id: &self.worker_id,
            worker_name: &self.worker_name,
            encoders: &capabilities.encoders,
            gpu_label: &capabilities.gpu_label,
        };
        let resp = self
            .authed(self.http.post(self.url("/register")).json(&req))
            .send()
            .await?;
        Self::interpret_status(resp).await?;
        Ok(())
    }

    /// Returns `None` when the coordinator has no work right now.
    pub async fn claim_job(&self) -> Result<Option<JobDescriptor>, CoordinatorError> {
        let resp = self
            .authed(self.http.post(self.url("/claim-job")))
            .send()
            .await?;
        let resp = Self::interpret_status(resp).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let parsed: ClaimResponse = resp.json().await?;
        Ok(match parsed {
            ClaimResponse::Job(job) => Some(job),
            ClaimResponse::Empty {} => None,
        })
    }

    /// `Ok(true)` keeps transcoding, `Ok(false)` means stop. Transport
    /// failures are soft: caller treats them as "keep going, retry next tick".
    pub async fn report_progress(&self, job_id: &str, sample: ProgressSample) -> bool {
        let req = ProgressRequest {
            percent_complete: sample.percent_complete,
            elapsed_seconds: sample.elapsed_seconds,
            estimated_total_seconds: sample.estimated_total_seconds,
        };
        let result: Result<ProgressResponse, CoordinatorError> = async {
            let resp = self
                .authed(
                    self.http
                        .post(self.url(&format!("/jobs/{job_id}/progress")))
                        .json(&req),
                )
                .send()
                .await?;
            let resp = Self::interpret_status(resp).await?;
            Ok(resp.json().await?)
        }
        .await;

        match result {
            Ok(body) => body.keep_going,
            Err(err) => {
                tracing::debug!(job_id, error = %err, "report_progress failed, treating as keep-going");
                true
            }
        }
    }

    /// Fire-and-note-failure.
    pub async fn heartbeat(&self, active_count: usize) {
        let req = HeartbeatRequest { active_count };
        let result: Result<(), CoordinatorError> = async {
            let resp = self
                .authed(self.http.post(self.url("/heartbeat")).json(&req))
                .send()
                .await?;
            Self::interpret_status(resp).await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "heartbeat failed");
        }
    }

    /// Streams the output file. Distinguishes `CoordinatorError::Gone` (HTTP
    /// 410, job cancelled during upload) so the pipeline can short-circuit.
    pub async fn upload_complete(
        &self,
        job_id: &str,
        file_path: &Path,
    ) -> Result<(), CoordinatorError> {
        let file = tokio::fs::File::open(file_path).await.map_err(|err| {
            CoordinatorError::UnexpectedStatus {
                status: 0,
                body: format!("failed to open output file: {err}"),
            }
        })?;
        let stream = tokio_util::io::ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        let resp = self
            .authed(
                self.http
                    .post(self.url(&format!("/jobs/{job_id}/upload")))
                    .body(body),
            )
            .send()
            .await?;
        Self::interpret_status(resp).await?;
        Ok(())
    }

    /// Best-effort; its own failure is logged but not re-raised.
    pub async fn report_error(&self, job_id: &str, message: &str) {
        let req = ErrorReportRequest { message };
        let result: Result<(), CoordinatorError> = async {
            let resp = self
                .authed(
                    self.http
                        .post(self.url(&format!("/jobs/{job_id}/error")))
                        .json(&req),
                )
                .send()
                .await?;
            Self::interpret_status(resp).await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(job_id, error = %err, "report_error failed");
        }
    }
}

/// Registration retries forever with this backoff between attempts.
pub const REGISTER_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Upload retries use linear backoff: `UPLOAD_RETRY_BASE * attempt_number`.
pub const UPLOAD_RETRY_BASE: Duration = Duration::from_secs(5);
