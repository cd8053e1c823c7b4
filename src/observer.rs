use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::UnboundedSender;

use crate::sample::{Results, WorkerResult};

/// Progress events published by the [`crate::Sampler`] and the [`crate::CapacityProbe`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A sample of `n` workers is about to start
    SamplingWorkers(usize),
    /// A worker process is up
    WorkerSpawned { worker_id: usize, pid: Option<u32> },
    /// Every worker passed the start barrier; the countdown begins
    WaitingInit,
    /// Time left before the stop signal is raised
    Waiting(Duration),
    /// One worker finished its send loop
    WorkerResult(WorkerResult),
    /// The whole sample finished
    SampleResult(Results),
    /// The probe is about to measure this concurrency level
    Probing(usize),
    /// The measurement of this level is in
    Measured { concurrency: usize },
    /// The probe found its peak at this level
    PeakFound { concurrency: usize },
}

/// An [`Observer`] is the sink for progress events.
///
/// Observers are injected into samplers and probes at construction; there is no global
/// hook. `publish` is called from the controller task and must not block for long, since
/// it sits on the countdown path.
///
/// Wrap a closure in [`FnObserver`] to observe ad hoc; `Arc`s of observers are
/// observers too, so one sink can be shared by a sampler and a probe:
///
/// ```rust
/// use std::sync::Arc;
/// use mqprobe::{Event, Observer, observer::FnObserver};
///
/// let log = Arc::new(FnObserver(|event: &Event| println!("{event:?}")));
/// log.publish(&Event::WaitingInit);
/// ```
pub trait Observer: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Adapts a closure into an [`Observer`].
#[derive(Debug, Clone, Copy)]
pub struct FnObserver<F>(pub F);

impl<F> Observer for FnObserver<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn publish(&self, event: &Event) {
        (self.0)(event)
    }
}

impl<O: Observer + ?Sized> Observer for Arc<O> {
    fn publish(&self, event: &Event) {
        (**self).publish(event)
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn publish(&self, _: &Event) {}
}

/// Renders events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn publish(&self, event: &Event) {
        match event {
            Event::SamplingWorkers(n) => tracing::info!("Sampling {n} workers..."),
            Event::WorkerSpawned { worker_id, pid } => {
                tracing::debug!(worker_id, ?pid, "Worker spawned")
            }
            Event::WaitingInit => tracing::info!("All workers ready, running now!"),
            Event::Waiting(remaining) => {
                tracing::debug!("{}s remaining", remaining.as_secs_f64())
            }
            Event::WorkerResult(r) => tracing::info!(
                worker_id = r.worker_id,
                iterations = r.iterations,
                "{}: {} ({:.1} msg/s)",
                r.worker_id,
                r.iterations,
                r.messages_per_second()
            ),
            Event::SampleResult(r) => tracing::info!(
                concurrency = r.description.concurrency,
                "Total: {} messages, {:.1} msg/s combined",
                r.messages_total(),
                r.throughput()
            ),
            Event::Probing(n) => tracing::info!("Probing concurrency {n}"),
            Event::Measured { concurrency } => {
                tracing::debug!(concurrency, "Measurement done")
            }
            Event::PeakFound { concurrency } => {
                tracing::info!("Peak throughput at concurrency {concurrency}")
            }
        }
    }
}

/// Forwards events to an unbounded channel. Publishing never blocks; events published
/// after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver(pub UnboundedSender<Event>);

impl Observer for ChannelObserver {
    fn publish(&self, event: &Event) {
        let _ = self.0.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn channel_observer_forwards_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = ChannelObserver(tx);
        observer.publish(&Event::SamplingWorkers(2));
        observer.publish(&Event::WaitingInit);

        assert_eq!(rx.try_recv().unwrap(), Event::SamplingWorkers(2));
        assert_eq!(rx.try_recv().unwrap(), Event::WaitingInit);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_observer_survives_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ChannelObserver(tx).publish(&Event::WaitingInit);
    }

    #[test]
    fn shared_closures_observe() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn Observer> =
            Arc::new(FnObserver(move |e: &Event| sink.lock().unwrap().push(e.clone())));
        observer.publish(&Event::Probing(4));
        assert_eq!(*seen.lock().unwrap(), vec![Event::Probing(4)]);
    }
}
