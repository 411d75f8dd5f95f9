//! Error types for taskuser-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskUserError {
    #[error("`{program}` exited with {status}: {stderr}")]
    HostCommand {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("identity provisioning failed: {0}")]
    Provision(String),

    #[error("no command at index {index} (task has {len})")]
    CommandIndex { index: usize, len: usize },

    #[error("command {index} exited with code {code:?} (log: {log_file})")]
    NonZeroExit {
        index: usize,
        code: Option<i32>,
        log_file: String,
    },

    #[error("launch error: {0}")]
    Launch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
