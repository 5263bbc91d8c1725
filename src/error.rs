//! Closed error taxonomy for the de-identification core.
//!
//! Every distinct run-failure kind lives here as a single enum so call
//! sites can match exhaustively instead of threading `anyhow::Error`
//! strings through the pipeline. CLI-boundary code still wraps these in
//! `anyhow::Context` for human-readable chains; library code returns
//! `Result<T, AppError>`.

use std::path::PathBuf;

use thiserror::Error;

/// The closed set of error kinds the core can produce.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to parse object at {path}: {kind}")]
    Parse { path: PathBuf, kind: ParseErrorKind },

    #[error("object at {path} is not supported for de-identification: {reason}")]
    UnsupportedObject { path: PathBuf, reason: String },

    #[error("unknown compliance profile '{0}'")]
    ProfileUnknown(String),

    #[error("compliance profile '{name}' is malformed: {reason}")]
    ProfileMalformed { name: String, reason: String },

    #[error("selection scope excludes every ingested object")]
    SelectionEmpty,

    #[error("detection unavailable: {0}")]
    DetectionUnavailable(String),

    #[error(
        "pixel invariant violated for {sop_instance_uid}: pre-hash {hash_before} != post-hash {hash_after} ({tag_path})"
    )]
    PixelInvariantViolated {
        sop_instance_uid: String,
        hash_before: String,
        hash_after: String,
        tag_path: String,
    },

    #[error("failed to write evidence bundle: {cause} (partial_state={partial_state})")]
    BundleWriteFailed { cause: String, partial_state: bool },

    #[error("review session is sealed; no further mutation is permitted")]
    SessionSealed,

    #[error("decision collector is locked; no further records may be added")]
    CollectorLocked,

    #[error("preflight check failed: {0}")]
    PreflightFailed(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kinds of per-object parse failure, as enumerated in the data model.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParseErrorKind {
    NotAnImageObject,
    Truncated,
    UnknownTagVr,
    UnsupportedTransferSyntax,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseErrorKind::NotAnImageObject => "not_an_image_object",
            ParseErrorKind::Truncated => "truncated",
            ParseErrorKind::UnknownTagVr => "unknown_tag_vr",
            ParseErrorKind::UnsupportedTransferSyntax => "unsupported_transfer_syntax",
        };
        f.write_str(s)
    }
}

/// Closed set of textual failure reasons surfaced in `run_status.json`.
///
/// Mirrors `AppError` but flattened to the strings recorded at the
/// run-status boundary (`preflight:<cause>`, `no_files_processed`, ...).
#[derive(Debug, Clone)]
pub enum FailureReason {
    Preflight(String),
    NoFilesProcessed,
    PixelInvariant,
    BundleWrite,
    Cancelled,
    ProfileUnknown,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Preflight(cause) => write!(f, "preflight:{cause}"),
            FailureReason::NoFilesProcessed => write!(f, "no_files_processed"),
            FailureReason::PixelInvariant => write!(f, "pixel_invariant"),
            FailureReason::BundleWrite => write!(f, "bundle_write"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::ProfileUnknown => write!(f, "profile_unknown"),
        }
    }
}

impl AppError {
    /// Map an error to the process exit code from the command-surface contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::PreflightFailed(_) => 2,
            AppError::PixelInvariantViolated { .. }
            | AppError::BundleWriteFailed { .. }
            | AppError::ProfileUnknown(_)
            | AppError::ProfileMalformed { .. } => 4,
            AppError::Cancelled => 5,
            _ => 1,
        }
    }

    /// Map a run-fatal error onto the closed `failure_reason` vocabulary.
    pub fn as_failure_reason(&self) -> Option<FailureReason> {
        match self {
            AppError::PreflightFailed(cause) => Some(FailureReason::Preflight(cause.clone())),
            AppError::PixelInvariantViolated { .. } => Some(FailureReason::PixelInvariant),
            AppError::BundleWriteFailed { .. } => Some(FailureReason::BundleWrite),
            AppError::Cancelled => Some(FailureReason::Cancelled),
            AppError::ProfileUnknown(_) | AppError::ProfileMalformed { .. } => {
                Some(FailureReason::ProfileUnknown)
            }
            AppError::SelectionEmpty => Some(FailureReason::NoFilesProcessed),
            _ => None,
        }
    }
}
