//! Error types for sampling and probing.

use thiserror::Error;

/// Failure to open a connection to the queue backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("connection failed: {0}")]
pub struct ConnectionError(pub String);

/// Failure to publish a single message through an open connection.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("transmission failed: {0}")]
pub struct TransmissionError(pub String);

/// Main error type for mqprobe operations.
///
/// Every variant raised while a sample is running is fatal to that sample: by the time the
/// caller sees it, all worker processes of the sample have been killed and reaped.
#[derive(Error, Debug)]
pub enum Error {
    /// A worker process could not be started
    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },

    /// A worker could not connect to the backend
    #[error("worker {worker_id} could not connect: {reason}")]
    Connection { worker_id: usize, reason: String },

    /// A worker's sender failed while the sample was running
    #[error("worker {worker_id} failed to send: {reason}")]
    Transmission { worker_id: usize, reason: String },

    /// A worker process went away without reporting a result
    #[error("worker {worker_id} exited without reporting")]
    WorkerExited { worker_id: usize },

    /// A worker spoke out of turn or sent something unreadable
    #[error("worker {worker_id} protocol violation: {message}")]
    Protocol { worker_id: usize, message: String },

    /// The error signal was found raised after every worker had been joined
    #[error("sample aborted after join: {0}")]
    PostRun(Box<Error>),

    /// Fewer results arrived than workers were started
    #[error("expected {expected} worker results, received {received}")]
    MissingResults { expected: usize, received: usize },

    /// A worker result belongs to another sample
    #[error("worker {worker_id} result belongs to a different sample")]
    ForeignResult { worker_id: usize },

    /// Concurrency levels start at one
    #[error("concurrency level must be at least 1")]
    InvalidConcurrency,

    /// `2^power` does not fit in a concurrency level
    #[error("starting power {0} overflows the concurrency range")]
    InvalidPower(u32),

    /// A measurement was reported for a level the search did not ask for
    #[error("expected a measurement for concurrency {expected:?}, got {got}")]
    UnexpectedProbe { expected: Option<usize>, got: usize },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for mqprobe operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error was reported by a worker rather than the controller.
    pub fn is_worker_failure(&self) -> bool {
        match self {
            Error::Connection { .. }
            | Error::Transmission { .. }
            | Error::WorkerExited { .. }
            | Error::Protocol { .. } => true,
            Error::PostRun(inner) => inner.is_worker_failure(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_run_wraps_worker_failures() {
        let err = Error::PostRun(Box::new(Error::WorkerExited { worker_id: 3 }));
        assert!(err.is_worker_failure());
        assert_eq!(
            err.to_string(),
            "sample aborted after join: worker 3 exited without reporting"
        );
        assert!(!Error::InvalidConcurrency.is_worker_failure());
    }
}
