//! Sampler: one measurement at one concurrency level
//!
//! A [`Sampler`] starts `n` publishers, lets them run for a fixed duration and collects
//! what each of them achieved into [`Results`]. The built-in [`ProcessSampler`] runs every
//! publisher in its own OS process, so a crashing backend client takes down one worker
//! and never the controller.
//!
//! # Lifecycle of `sample(n)`
//! 1. `n` worker processes are spawned, each watched by a supervisor task.
//! 2. Every worker connects to the backend, then all `n` supervisors and the controller
//!    meet at a start barrier. Workers that fail to connect still arrive at the barrier,
//!    so nobody waits forever for them.
//! 3. The controller counts the configured duration down in ticks, checking the error
//!    signal at every tick.
//! 4. The stop signal is raised, every worker is joined, the error signal is checked once
//!    more, and the worker results are drained.
//!
//! # Failure model
//! The error signal is sticky: the first failure reported by any party is kept, later
//! ones are only logged. Any failure aborts the sample, and every process spawned for it
//! is killed and reaped before the error reaches the caller. There are no retries and no
//! partial results.
//!
//! A worker that never reacts to the stop signal blocks `sample` indefinitely; joins
//! have no timeout.
pub mod process;
pub use process::ProcessSampler;

use std::{
    future::Future,
    io,
    sync::{Arc, OnceLock},
};

use crate::{
    error::{Error, Result},
    sample::Results,
};

/// Runs one measurement at a given concurrency level.
pub trait Sampler: Send + Sync {
    /// Run `n` publishers for the configured duration.
    ///
    /// Either returns exactly `n` worker results sharing one description, or fails.
    fn sample(&self, n: usize) -> impl Future<Output = Result<Results>> + Send;
}

impl<S: Sampler> Sampler for &S {
    fn sample(&self, n: usize) -> impl Future<Output = Result<Results>> + Send {
        (**self).sample(n)
    }
}

/// The first failure reported during a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    Spawn {
        worker_id: usize,
        kind: io::ErrorKind,
        message: String,
    },
    Connection {
        worker_id: usize,
        reason: String,
    },
    Transmission {
        worker_id: usize,
        reason: String,
    },
    Exited {
        worker_id: usize,
    },
    Protocol {
        worker_id: usize,
        message: String,
    },
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Spawn {
                worker_id,
                kind,
                message,
            } => Error::Spawn {
                worker_id,
                source: io::Error::new(kind, message),
            },
            Failure::Connection { worker_id, reason } => Error::Connection { worker_id, reason },
            Failure::Transmission { worker_id, reason } => {
                Error::Transmission { worker_id, reason }
            }
            Failure::Exited { worker_id } => Error::WorkerExited { worker_id },
            Failure::Protocol { worker_id, message } => Error::Protocol { worker_id, message },
        }
    }
}

/// Sticky, shareable error flag. Once raised it stays raised, and it keeps the first
/// cause it was raised with.
#[derive(Debug, Clone, Default)]
pub struct ErrorSignal {
    cause: Arc<OnceLock<Failure>>,
}

impl ErrorSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `false` if it was already raised, in which case the
    /// original cause is kept.
    pub fn raise(&self, failure: Failure) -> bool {
        match self.cause.set(failure) {
            Ok(()) => true,
            Err(later) => {
                tracing::debug!("Error signal already raised, dropping {later:?}");
                false
            }
        }
    }

    pub fn is_raised(&self) -> bool {
        self.cause.get().is_some()
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.get()
    }

    /// `Err` with the first cause if the signal is raised.
    pub fn check(&self) -> Result<()> {
        match self.cause.get() {
            Some(failure) => Err(failure.clone().into()),
            None => Ok(()),
        }
    }
}
