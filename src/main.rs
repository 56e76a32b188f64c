//! Process bootstrap: initialize logging, load configuration, hand off to
//! the Runner. Exit codes per section 6: 0 on graceful shutdown, non-zero on
//! missing `WORKER_KEY` or any unhandled fatal error.

use tracing_subscriber::EnvFilter;

use transcode_worker::config::WorkerConfig;
use transcode_worker::runner::Runner;

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    // Peek LOG_LEVEL directly: the subscriber must be up before config
    // loading can log anything, and config loading itself may fail.
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(&log_level);

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let runner = Runner::new(config);
    if let Err(err) = runner.run().await {
        tracing::error!(error = %err, "worker exited with a fatal error");
        std::process::exit(1);
    }
}
