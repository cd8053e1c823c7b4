//! Records produced by a sample: what was measured, and what each worker achieved.
//!
//! A [`WorkerResult`] is the smallest unit, emitted once per worker when its send loop
//! ends. [`Results`] collects the worker results of one concurrency level. It keeps the
//! raw counts only; rates are derived on demand so nothing is lost when results are
//! persisted or passed to an observer.

use std::time::Duration;

use crate::{
    error::{Error, Result},
    macros::record,
};

/// Identifies one measurement run. Created once per `sample(n)` call and shared by every
/// worker result of that run.
#[record]
#[derive(Eq, Hash)]
pub struct SampleDescription {
    /// Number of simultaneous publishers
    pub concurrency: usize,
    /// How the publishers are run, e.g. `"process"`
    pub mechanism: String,
    /// Backend label of the connector
    pub backend: String,
}

impl SampleDescription {
    pub fn new(concurrency: usize, mechanism: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            concurrency,
            mechanism: mechanism.into(),
            backend: backend.into(),
        }
    }
}

/// Outcome of a single worker's send loop.
#[record]
pub struct WorkerResult {
    pub description: SampleDescription,
    /// 1-based worker id
    pub worker_id: usize,
    /// Messages sent before the stop signal was observed
    pub iterations: u64,
    /// Time spent in the send loop
    pub elapsed: Duration,
}

impl WorkerResult {
    pub fn messages_per_second(&self) -> f64 {
        rate(self.iterations, self.elapsed)
    }
}

/// All worker results of one concurrency level.
#[record]
pub struct Results {
    pub description: SampleDescription,
    pub workers: Vec<WorkerResult>,
}

impl Results {
    /// Create an empty result set for `description`.
    pub fn new(description: SampleDescription) -> Self {
        Self {
            description,
            workers: Vec::new(),
        }
    }

    /// Build a result set, rejecting any worker result from a different sample.
    pub fn from_workers(
        description: SampleDescription,
        workers: impl IntoIterator<Item = WorkerResult>,
    ) -> Result<Self> {
        let mut results = Self::new(description);
        for worker in workers {
            results.consume(worker)?;
        }
        Ok(results)
    }

    /// Add a single worker result.
    pub fn consume(&mut self, worker: WorkerResult) -> Result<()> {
        if worker.description != self.description {
            return Err(Error::ForeignResult {
                worker_id: worker.worker_id,
            });
        }
        self.workers.push(worker);
        Ok(())
    }

    /// Whether one result per requested worker is present.
    pub fn is_complete(&self) -> bool {
        self.workers.len() == self.description.concurrency
    }

    /// Sum of messages sent by all workers.
    pub fn messages_total(&self) -> u64 {
        self.workers.iter().map(|w| w.iterations).sum()
    }

    /// Sum of the time every worker spent sending.
    pub fn elapsed(&self) -> Duration {
        self.workers.iter().map(|w| w.elapsed).sum()
    }

    /// Messages per second of worker time.
    ///
    /// This divides the message total by the *summed* worker time, so it reads as the
    /// average rate of a single publisher at this concurrency level.
    pub fn messages_per_second(&self) -> f64 {
        rate(self.messages_total(), self.elapsed())
    }

    /// Combined publishing rate of all workers.
    pub fn throughput(&self) -> f64 {
        self.workers.iter().map(WorkerResult::messages_per_second).sum()
    }
}

fn rate(messages: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    messages as f64 / secs
}
