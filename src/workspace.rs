//! Per-job temp workspace: a pair of absolute paths under the configured
//! temp directory, created on job entry and unconditionally removed on exit.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct JobWorkspace {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl JobWorkspace {
    pub fn new(temp_dir: &std::path::Path, job_id: &str) -> Self {
        JobWorkspace {
            input_path: temp_dir.join(format!("input-{job_id}.tmp")),
            output_path: temp_dir.join(format!("output-{job_id}.mp4")),
        }
    }

    /// Unconditionally removes both workspace files. Missing files are not
    /// an error: cleanup must succeed regardless of how far the job got.
    pub async fn cleanup(&self) {
        for path in [&self.input_path, &self.output_path] {
            if let Err(err) = tokio::fs::remove_file(path).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove workspace file");
            }
        }
    }
}

/// Ensures the temp directory exists, creating it recursively if needed.
/// Called once at startup and best-effort swept on shutdown.
pub async fn ensure_temp_dir(temp_dir: &std::path::Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(temp_dir).await
}

/// Best-effort sweep of the temp directory on shutdown. Leftover entries are
/// ephemeral by contract (section 6, Persisted state: none).
pub async fn sweep_temp_dir(temp_dir: &std::path::Path) {
    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %temp_dir.display(), error = %err, "failed to read temp dir for shutdown sweep");
            return;
        }
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                if let Err(err) = tokio::fs::remove_file(entry.path()).await {
                    tracing::warn!(path = %entry.path().display(), error = %err, "failed to sweep temp file");
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "failed to iterate temp dir during shutdown sweep");
                break;
            }
        }
    }
}
