//! Error taxonomy for the download engine.
//!
//! Typed errors are used inside components, the way the teacher's `ClientError`
//! is typed inside `PHClient` (see `api/client.rs`); `anyhow` is used at the
//! orchestration edges the way `commands::Cli::run` uses it.

use std::path::PathBuf;
use thiserror::Error;

/// One of the checkpoint store's failure shapes.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("i/o error on checkpoint file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint at {path} is corrupt or stale: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("lock for target {target_key} is held by another process")]
    Locked { target_key: String },
}

/// HTTP-layer failures.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("captcha challenge could not be resolved")]
    Captcha,
    #[error("request exceeded its deadline")]
    Timeout,
}

/// Media download failures.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("request error: {0}")]
    Request(#[from] HttpError),
    #[error("i/o error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download exceeded wall-clock deadline")]
    Timeout,
}

/// Critical field missing from a parsed API payload after defensive
/// fallbacks.
#[derive(Error, Debug)]
#[error("missing required field `{field}` in {context}")]
pub struct ApiSchemaError {
    pub field: &'static str,
    pub context: String,
}

/// The top-level taxonomy; each variant carries the process exit code it
/// maps to.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limit exhausted: {0}")]
    RateLimit(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("target `{target_key}` failed: {source}")]
    Target {
        target_key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("api schema error: {0}")]
    ApiSchema(#[from] ApiSchemaError),
    #[error("initialization error: {0}")]
    Init(String),
    #[error("interrupted")]
    Interrupt,
}

impl EngineError {
    /// Maps a top-level error to the process exit code the CLI should use.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Init(_) => 2,
            EngineError::Auth(_) => 3,
            EngineError::Interrupt => 5,
            EngineError::RateLimit(_)
            | EngineError::Checkpoint(_)
            | EngineError::Target { .. }
            | EngineError::ApiSchema(_) => 1,
        }
    }
}
