use thiserror::Error;

/// Top-level error taxonomy for the daemon. Startup-phase variants propagate
/// to `main` and set the process exit code; cycle- and node-level failures
/// are caught and logged by their caller instead of bubbling up through this
/// type (see `coordinator.rs`).
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
