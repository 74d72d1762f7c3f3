//! Error types for connector-bench

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Systemic task failure, dispatch aborted: {0}")]
    Systemic(#[from] UnitOfWorkError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failure to establish a connection during pool fill
///
/// Fatal for the current variant's run; other variants continue.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Authentication failed for user '{user}': {message}")]
    AuthFailed { user: String, message: String },

    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),

    #[error("Server rejected connection: {0}")]
    Rejected(String),

    #[error("Connect timeout after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by the resource pool's acquire/release protocol
#[derive(Error, Debug)]
pub enum PoolError {
    /// A task waited past the bound for a free connection. Counted as a
    /// task failure, never fatal to the dispatch.
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    #[error("Pool is closed")]
    Closed,

    /// Misuse of the pool protocol (double release, release without a
    /// matching acquire). Always a harness bug, never a server fault.
    #[error("Pool protocol violation: {0}")]
    Violation(String),
}

/// Failure of a single unit of work against an acquired connection
#[derive(Error, Debug)]
pub enum UnitOfWorkError {
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(io::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl UnitOfWorkError {
    /// Non-transient configuration faults: every sibling task would fail
    /// identically, so the dispatcher short-circuits instead of burning
    /// the deadline window one doomed task at a time.
    pub fn is_fatal(&self) -> bool {
        match self {
            // ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_BAD_DB_ERROR
            Self::Server { code, .. } => matches!(code, 1044 | 1045 | 1049),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
