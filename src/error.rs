use thiserror::Error;

use crate::types::TaskKind;

/// Task-level failures. Per-probe timeouts and refusals are never errors;
/// they fold into `None` / `false` results.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a {running} task is already running, stop it first")]
    Busy { running: TaskKind },

    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    #[error("failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a device with IP {0} already exists")]
    DuplicateIp(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
