//! Error kinds surfaced by the engine (spec §7).
//!
//! `SetupError` and `ProtocolViolation` are returned to callers; `OutputError`,
//! `LatencyWarning`, and `PriorityWarning` are not exceptions — they are
//! recorded into engine status or logged, per the propagation policy in §7.

use thiserror::Error;

/// Failures during `open`/`prepare` of audio objects, or an invalid chainsetup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("audio object '{label}' failed to open: {reason}")]
    OpenFailed { label: String, reason: String },

    #[error("audio object '{label}' failed to prepare: {reason}")]
    PrepareFailed { label: String, reason: String },

    #[error("chainsetup is not enabled")]
    ChainsetupNotEnabled,

    #[error("chainsetup has no chains")]
    NoChains,

    #[error("chain {chain} references unknown input index {index}")]
    UnknownInput { chain: usize, index: usize },

    #[error("chain {chain} references unknown output index {index}")]
    UnknownOutput { chain: usize, index: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Precondition breaches on engine operations. These indicate a caller bug
/// and are never expected in normal operation.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("prepare_operation called while running or already prepared")]
    PrepareWhileActive,

    #[error("start_operation called without a prior prepare_operation")]
    StartWithoutPrepare,

    #[error("start_operation called while already running")]
    StartWhileRunning,

    #[error("exec called on an engine that is no longer valid (already run to completion or in error)")]
    ExecWhileInvalid,
}

/// Top-level error type returned from engine construction and `exec`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}
