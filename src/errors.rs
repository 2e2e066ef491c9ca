//! Error kinds raised by the core, per spec §7.

use crate::sysexits::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("{0}: invalid specification")]
    InvalidSpec(String),

    #[error("{0}: invalid project name")]
    InvalidProjectName(String),

    #[error("{0}: service not found")]
    ServiceNotFound(String),

    #[error("{0}: volume not found")]
    VolumeNotFound(String),

    #[error("{0}: invalid command type")]
    InvalidCmdType(String),

    #[error("Director file not defined")]
    DirectorFileNotDefined,

    #[error("{0}: project locked")]
    ProjectLocked(String),

    #[error("locks directory not configured")]
    LocksNotFound,

    /// An `appjail` invocation for `service` returned a non-zero status.
    /// Its exit code *is* that status, not a fixed sysexits constant
    /// (spec §7: "external-tool non-zero statuses are returned as the
    /// process exit code for the offending operation").
    #[error("{service}: {operation} failed with status {status}")]
    ExternalStatus {
        service: String,
        operation: String,
        status: i32,
    },
}

impl DirectorError {
    /// Exit code this error maps to when it escapes to the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            DirectorError::InvalidSpec(_) => EX_DATAERR,
            DirectorError::InvalidProjectName(_) => EX_DATAERR,
            DirectorError::ServiceNotFound(_) => EX_DATAERR,
            DirectorError::VolumeNotFound(_) => EX_DATAERR,
            DirectorError::InvalidCmdType(_) => EX_SOFTWARE,
            DirectorError::DirectorFileNotDefined => EX_CONFIG,
            DirectorError::ProjectLocked(_) => EX_NOPERM,
            DirectorError::LocksNotFound => EX_CONFIG,
            DirectorError::ExternalStatus { status, .. } => *status,
        }
    }
}
