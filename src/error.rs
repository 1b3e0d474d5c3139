//! Crate-local error types
//!
//! Library-boundary code (job table, proc mirror, history, credentials)
//! returns [`ShellError`] so callers can match on the failure kind. The
//! evaluator/builtin/main layer threads `anyhow::Result` instead, the way
//! the teacher's `BuiltinCmd::run` and `ShellConfig::run` do.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("job table is full")]
    JobTableFull,

    #[error("Job ({0}) does not exist.")]
    JobNotFound(String),

    #[error("proc mirror io error: {0}")]
    ProcMirrorIo(#[source] std::io::Error),

    #[error("history io error: {0}")]
    HistoryIo(#[source] std::io::Error),

    #[error("credential io error: {0}")]
    CredentialIo(#[source] std::io::Error),

    #[error("incorrect username or password")]
    AuthFailed,

    #[error("failed to install signal handler: {0}")]
    SignalInstall(#[source] nix::Error),

    #[error("history index {0} out of range")]
    HistoryIndexOutOfRange(usize),
}

pub type ShellResult<T> = Result<T, ShellError>;
