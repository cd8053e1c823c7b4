use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use tokio::{
    io::BufReader,
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{
        Barrier,
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch::{self, Receiver},
    },
    task::JoinHandle,
};
use typed_builder::TypedBuilder;

use super::{ErrorSignal, Failure, Sampler};
use crate::{
    config::Config,
    error::{Error, Result},
    observer::{Event, Observer},
    protocol::{ControlMessage, WORKER_ID_ENV, WorkerMessage, read_message, write_message},
    sample::{Results, SampleDescription, WorkerResult},
};
use internals::*;

/// Mechanism label recorded in every [`SampleDescription`] this sampler produces.
pub const MECHANISM: &str = "process";

/// Sampler that runs every publisher in its own child process.
///
/// Each worker process is an instance of `program` started with `args` and the worker id
/// in [`WORKER_ID_ENV`]; it is expected to call [`crate::worker::serve`]. On the
/// controller side every process gets a supervisor task that speaks the
/// [`crate::protocol`] on the child's stdin/stdout and stands in for the worker at the
/// start barrier.
///
/// # Tuning knobs
/// - `duration`: how long the workers send once released.
/// - `tick`: granularity of the countdown, and thereby how quickly a failing worker aborts
///   the sample. One `Waiting` event is published per tick.
#[derive(TypedBuilder)]
pub struct ProcessSampler<O: Observer> {
    /// Worker executable.
    #[builder(setter(into))]
    pub program: PathBuf,
    /// Arguments passed to every worker, typically selecting the backend.
    #[builder(default, setter(into))]
    pub args: Vec<String>,
    /// Backend label for the sample description.
    #[builder(setter(into))]
    pub backend: String,
    /// How long the workers send.
    #[builder(default = Duration::from_secs(10))]
    pub duration: Duration,
    /// Countdown granularity.
    #[builder(default = Duration::from_secs(1))]
    pub tick: Duration,
    pub observer: O,
}

impl<O: Observer> ProcessSampler<O> {
    /// A sampler that starts `config.worker_program` with the backend name as its only
    /// argument.
    pub fn from_config(config: &Config, observer: O) -> Self {
        Self {
            program: config.worker_program.clone(),
            args: vec![config.backend.clone()],
            backend: config.backend.clone(),
            duration: config.duration,
            tick: config.tick,
            observer,
        }
    }

    fn command(&self, worker_id: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(WORKER_ID_ENV, worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    async fn run(
        &self,
        description: &SampleDescription,
        ctx: &SampleContext,
        stop_tx: &watch::Sender<bool>,
        results_rx: &mut UnboundedReceiver<WorkerResult>,
        pool: &mut WorkerPool,
    ) -> Result<Results> {
        let n = description.concurrency;

        tracing::info!("Spawning {n} workers...");
        for worker_id in 1..=n {
            ctx.error.check()?;
            let mut child = match self.command(worker_id).spawn() {
                Ok(child) => child,
                Err(source) => {
                    ctx.error.raise(Failure::Spawn {
                        worker_id,
                        kind: source.kind(),
                        message: source.to_string(),
                    });
                    return Err(Error::Spawn { worker_id, source });
                }
            };
            let pid = child.id();
            let pipes = child.stdin.take().zip(child.stdout.take());
            pool.children.push(child);
            let Some((stdin, stdout)) = pipes else {
                return Err(Error::Io(std::io::Error::other(format!(
                    "worker {worker_id} was spawned without pipes"
                ))));
            };

            let link = WorkerLink {
                worker_id,
                description: description.clone(),
                stdin,
                stdout: BufReader::new(stdout),
            };
            pool.supervisors.push(tokio::spawn(supervise(link, ctx.clone())));
            self.observer
                .publish(&Event::WorkerSpawned { worker_id, pid });
        }

        tracing::info!("Waiting for {n} workers at the start barrier...");
        ctx.barrier.wait().await;
        self.observer.publish(&Event::WaitingInit);

        self.countdown(&ctx.error).await?;

        tracing::info!("Signaling stop...");
        // every supervisor holds a receiver, so this only fails once they are all gone
        let _ = stop_tx.send(true);
        pool.join().await?;
        ctx.error
            .check()
            .map_err(|e| Error::PostRun(Box::new(e)))?;

        tracing::info!("Retrieving data from workers...");
        let mut results = Results::new(description.clone());
        while let Ok(result) = results_rx.try_recv() {
            self.observer.publish(&Event::WorkerResult(result.clone()));
            results.consume(result)?;
        }
        if !results.is_complete() {
            return Err(Error::MissingResults {
                expected: n,
                received: results.workers.len(),
            });
        }
        results.workers.sort_by_key(|w| w.worker_id);

        self.observer.publish(&Event::SampleResult(results.clone()));
        Ok(results)
    }

    async fn countdown(&self, error: &ErrorSignal) -> Result<()> {
        let mut remaining = self.duration;
        while !remaining.is_zero() {
            error.check()?;
            self.observer.publish(&Event::Waiting(remaining));
            let step = if self.tick.is_zero() {
                remaining
            } else {
                remaining.min(self.tick)
            };
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        Ok(())
    }
}

impl<O: Observer> Sampler for ProcessSampler<O> {
    async fn sample(&self, n: usize) -> Result<Results> {
        self.observer.publish(&Event::SamplingWorkers(n));
        if n == 0 {
            return Err(Error::InvalidConcurrency);
        }

        let description = SampleDescription::new(n, MECHANISM, self.backend.as_str());
        let (ctx, stop_tx, mut results_rx) = SampleContext::new(n);
        let mut pool = WorkerPool::default();

        match self
            .run(&description, &ctx, &stop_tx, &mut results_rx, &mut pool)
            .await
        {
            Ok(results) => {
                tracing::info!("Done sampling {n} workers!");
                Ok(results)
            }
            Err(e) => {
                tracing::error!("Sample of {n} workers failed: {e}");
                pool.terminate().await;
                Err(e)
            }
        }
    }
}

/// Internal components of the `ProcessSampler`.
mod internals {
    use super::*;

    /// Shared state of one `sample()` call. Created fresh for every call.
    #[derive(Clone)]
    pub struct SampleContext {
        /// `n` supervisors plus the controller
        pub barrier: Arc<Barrier>,
        pub stop: Receiver<bool>,
        pub error: ErrorSignal,
        pub results: UnboundedSender<WorkerResult>,
    }

    impl SampleContext {
        pub fn new(
            n: usize,
        ) -> (
            Self,
            watch::Sender<bool>,
            UnboundedReceiver<WorkerResult>,
        ) {
            let (stop_tx, stop_rx) = watch::channel(false);
            let (results_tx, results_rx) = mpsc::unbounded_channel();
            (
                Self {
                    barrier: Arc::new(Barrier::new(n + 1)),
                    stop: stop_rx,
                    error: ErrorSignal::new(),
                    results: results_tx,
                },
                stop_tx,
                results_rx,
            )
        }
    }

    /// Controller-side ends of one worker process.
    pub struct WorkerLink {
        pub worker_id: usize,
        pub description: SampleDescription,
        pub stdin: ChildStdin,
        pub stdout: BufReader<ChildStdout>,
    }

    impl WorkerLink {
        /// Classify an unexpected reply (or the lack of one) from the worker.
        pub fn failure(&self, reply: Result<Option<WorkerMessage>>, expected: &str) -> Failure {
            let worker_id = self.worker_id;
            match reply {
                Ok(Some(WorkerMessage::Failed { stage, reason })) => match stage {
                    crate::protocol::FailureStage::Connect => {
                        Failure::Connection { worker_id, reason }
                    }
                    crate::protocol::FailureStage::Send => {
                        Failure::Transmission { worker_id, reason }
                    }
                },
                Ok(None) => Failure::Exited { worker_id },
                Ok(Some(other)) => Failure::Protocol {
                    worker_id,
                    message: format!("expected {expected}, got {other:?}"),
                },
                Err(e) => Failure::Protocol {
                    worker_id,
                    message: e.to_string(),
                },
            }
        }
    }

    /// Every process and supervisor task spawned by one `sample()` call.
    #[derive(Default)]
    pub struct WorkerPool {
        pub children: Vec<Child>,
        pub supervisors: Vec<JoinHandle<()>>,
    }

    impl WorkerPool {
        /// Wait for every supervisor and every process to finish. No timeout.
        pub async fn join(&mut self) -> Result<()> {
            for handle in self.supervisors.drain(..) {
                if let Err(e) = handle.await {
                    tracing::error!("Supervisor task failed: {e}");
                }
            }
            for child in self.children.iter_mut() {
                let status = child.wait().await?;
                if !status.success() {
                    tracing::warn!(pid = ?child.id(), "Worker exited with {status}");
                }
            }
            Ok(())
        }

        /// Kill and reap every process, abandoning the supervisors.
        pub async fn terminate(&mut self) {
            for handle in self.supervisors.drain(..) {
                handle.abort();
            }
            let mut killed = 0;
            for child in self.children.iter_mut() {
                match child.kill().await {
                    Ok(()) => killed += 1,
                    // already exited and reaped
                    Err(e) => tracing::debug!("Not killing worker: {e}"),
                }
            }
            tracing::info!("Terminated {killed} of {} workers", self.children.len());
        }
    }

    /// Stand in for one worker process: relay the barrier, start and stop signals to it and
    /// forward its result. Anything unexpected raises the error signal.
    pub async fn supervise(mut link: WorkerLink, ctx: SampleContext) {
        let worker_id = link.worker_id;

        let reply = read_message(&mut link.stdout).await;
        let ready = match reply {
            Ok(Some(WorkerMessage::Ready)) => true,
            other => {
                let failure = link.failure(other, "ready");
                tracing::error!(worker_id, "Worker failed before start: {failure:?}");
                ctx.error.raise(failure);
                false
            }
        };
        // arrive even when the worker is gone, or the whole sample deadlocks
        ctx.barrier.wait().await;
        if !ready {
            return;
        }

        if write_message(&mut link.stdin, &ControlMessage::Start)
            .await
            .is_err()
        {
            ctx.error.raise(Failure::Exited { worker_id });
            return;
        }

        let mut stop = ctx.stop.clone();
        let early = tokio::select! {
            _ = stop.wait_for(|s| *s) => None,
            reply = read_message::<_, WorkerMessage>(&mut link.stdout) => Some(reply),
        };
        if let Some(reply) = early {
            let failure = link.failure(reply, "nothing before stop");
            tracing::error!(worker_id, "Worker failed while running: {failure:?}");
            ctx.error.raise(failure);
            return;
        }

        if write_message(&mut link.stdin, &ControlMessage::Stop)
            .await
            .is_err()
        {
            ctx.error.raise(Failure::Exited { worker_id });
            return;
        }

        match read_message(&mut link.stdout).await {
            Ok(Some(WorkerMessage::Finished {
                iterations,
                elapsed,
            })) => {
                let result = WorkerResult {
                    description: link.description,
                    worker_id,
                    iterations,
                    elapsed,
                };
                // the receiver lives until the sample returns
                let _ = ctx.results.send(result);
            }
            other => {
                let failure = link.failure(other, "finished");
                tracing::error!(worker_id, "Worker failed to report: {failure:?}");
                ctx.error.raise(failure);
            }
        }
    }
}
