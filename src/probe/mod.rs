//! Capacity probe: locate the concurrency level with peak throughput
//!
//! All realizations share one search rule, implemented once by [`CapacitySearch`]:
//!
//! - [`find_maximum`] drives it with a synchronous measuring function,
//! - [`find_maximum_async`] drives it with an async one,
//! - [`CapacityProbe`] adds an observer and knows how to measure through a [`Sampler`].
//!
//! # Probe order
//! Starting at `n0 = 2^power`:
//!
//! ```text
//! growth:      n0, 2*n0, 4*n0, ...     while each value beats the best so far
//! refinement:  low+1, low+2, ... < high  while each value beats the best so far
//! ```
//!
//! where `low` is the last improving level of the growth phase and `high = 2 * low` the
//! level that failed to improve on it.
//!
//! The probe is strictly sequential and has no retries: the first failed measurement
//! ends the search with that error.
pub mod search;
pub use search::{CapacitySearch, Peak, Step};

use std::future::Future;

use typed_builder::TypedBuilder;

use crate::{
    error::Result,
    observer::{Event, Observer},
    sample::Results,
    sampler::Sampler,
};

/// Search for the peak of `measure`, starting at `2^power` workers.
pub fn find_maximum<V, F>(mut measure: F, power: u32) -> Result<Peak<V>>
where
    V: PartialOrd + Clone,
    F: FnMut(usize) -> Result<V>,
{
    let mut search = CapacitySearch::new(power)?;
    let mut n = search.next_probe().unwrap_or(1);
    loop {
        let value = measure(n)?;
        match search.report(n, value)? {
            Step::Continue(next) => n = next,
            Step::Done(peak) => return Ok(peak),
        }
    }
}

/// [`find_maximum`] for measurements that have to be awaited.
pub async fn find_maximum_async<V, F, Fut>(mut measure: F, power: u32) -> Result<Peak<V>>
where
    V: PartialOrd + Clone,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let mut search = CapacitySearch::new(power)?;
    let mut n = search.next_probe().unwrap_or(1);
    loop {
        let value = measure(n).await?;
        match search.report(n, value)? {
            Step::Continue(next) => n = next,
            Step::Done(peak) => return Ok(peak),
        }
    }
}

/// Capacity probe with progress reporting.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use mqprobe::{CapacityProbe, ProcessSampler, TracingObserver};
///
/// # async fn run() -> mqprobe::error::Result<()> {
/// let sampler = ProcessSampler::builder()
///     .program("target/release/mqprobe-worker")
///     .args(vec!["null".to_string()])
///     .backend("null")
///     .duration(Duration::from_secs(5))
///     .observer(TracingObserver)
///     .build();
/// let peak = CapacityProbe::builder()
///     .observer(TracingObserver)
///     .build()
///     .probe_sampler(&sampler, |r| r.messages_total())
///     .await?;
/// println!("{} messages with {} workers", peak.value, peak.concurrency);
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct CapacityProbe<O: Observer> {
    /// The search starts at `2^power` workers
    #[builder(default = 0)]
    pub power: u32,
    pub observer: O,
}

impl<O: Observer> CapacityProbe<O> {
    /// Run the search over an arbitrary measurement.
    pub async fn probe<V, F, Fut>(&self, mut measure: F) -> Result<Peak<V>>
    where
        V: PartialOrd + Clone,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let observer = &self.observer;
        let peak = find_maximum_async(
            move |n| {
                observer.publish(&Event::Probing(n));
                let measured = measure(n);
                async move {
                    let value = measured.await;
                    if value.is_ok() {
                        observer.publish(&Event::Measured { concurrency: n });
                    }
                    value
                }
            },
            self.power,
        )
        .await?;
        observer.publish(&Event::PeakFound {
            concurrency: peak.concurrency,
        });
        Ok(peak)
    }

    /// Run the search, measuring each level with `sampler` and reducing its results to a
    /// scalar with `reduce` (e.g. [`Results::messages_total`]).
    pub async fn probe_sampler<S, V, R>(&self, sampler: &S, reduce: R) -> Result<Peak<V>>
    where
        S: Sampler,
        V: PartialOrd + Clone,
        R: Fn(&Results) -> V,
    {
        let reduce = &reduce;
        self.probe(move |n| {
            let sampled = sampler.sample(n);
            async move { sampled.await.map(|results| reduce(&results)) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        observer::ChannelObserver,
        sample::{SampleDescription, WorkerResult},
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio::sync::mpsc;

    /// (measurements in probe order, expected result, power)
    fn scenarios() -> Vec<(Vec<(usize, u64)>, u64, u32)> {
        vec![
            (vec![(1, 1), (2, 1)], 1, 0),
            (vec![(1, 1), (2, 2), (4, 1), (3, 1)], 2, 0),
            (vec![(1, 1), (2, 2), (4, 1), (3, 3)], 3, 0),
            (
                vec![(1, 1), (2, 2), (4, 3), (8, 4), (16, 5), (32, 1), (17, 1)],
                5,
                0,
            ),
            (
                vec![(1, 1), (2, 2), (4, 3), (8, 1), (5, 4), (6, 5), (7, 1)],
                5,
                0,
            ),
            (vec![(4, 1), (8, 1), (5, 1)], 1, 2),
        ]
    }

    /// Measurement that answers from a table and records what was asked.
    fn scripted(
        sequence: &[(usize, u64)],
    ) -> (impl FnMut(usize) -> Result<u64>, Arc<Mutex<Vec<usize>>>) {
        let table: HashMap<usize, u64> = sequence.iter().copied().collect();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let measure = move |n: usize| {
            seen.lock().unwrap().push(n);
            table
                .get(&n)
                .copied()
                .ok_or(Error::InvalidConcurrency)
        };
        (measure, calls)
    }

    fn order(sequence: &[(usize, u64)]) -> Vec<usize> {
        sequence.iter().map(|(n, _)| *n).collect()
    }

    #[test]
    fn direct_driver_follows_probe_order() {
        for (sequence, result, power) in scenarios() {
            let (measure, calls) = scripted(&sequence);
            let peak = find_maximum(measure, power).unwrap();
            assert_eq!(peak.value, result, "{sequence:?}");
            assert_eq!(*calls.lock().unwrap(), order(&sequence));
        }
    }

    #[tokio::test]
    async fn async_driver_follows_probe_order() {
        for (sequence, result, power) in scenarios() {
            let (mut measure, calls) = scripted(&sequence);
            let peak = find_maximum_async(|n| std::future::ready(measure(n)), power)
                .await
                .unwrap();
            assert_eq!(peak.value, result, "{sequence:?}");
            assert_eq!(*calls.lock().unwrap(), order(&sequence));
        }
    }

    #[test]
    fn state_machine_yields_probe_order() {
        for (sequence, result, power) in scenarios() {
            let mut search = CapacitySearch::new(power).unwrap();
            let mut steps = sequence.iter();
            let peak = loop {
                let (n, value) = steps.next().expect("search asked for too many levels");
                assert_eq!(search.next_probe(), Some(*n));
                match search.report(*n, *value).unwrap() {
                    Step::Continue(_) => {}
                    Step::Done(peak) => break peak,
                }
            };
            assert!(steps.next().is_none(), "search stopped early on {sequence:?}");
            assert_eq!(peak.value, result);
        }
    }

    #[test]
    fn peak_reports_smallest_winning_level() {
        let (measure, _) = scripted(&[(1, 1), (2, 2), (4, 3), (8, 4), (16, 5), (32, 1), (17, 1)]);
        assert_eq!(find_maximum(measure, 0).unwrap().concurrency, 16);

        let (measure, _) = scripted(&[(1, 1), (2, 2), (4, 1), (3, 3)]);
        assert_eq!(find_maximum(measure, 0).unwrap().concurrency, 3);
    }

    #[test]
    fn failed_measurement_aborts_the_search() {
        let mut calls = Vec::new();
        let err = find_maximum(
            |n| {
                calls.push(n);
                if n == 4 {
                    Err(Error::WorkerExited { worker_id: 3 })
                } else {
                    Ok(n as u64)
                }
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::WorkerExited { worker_id: 3 }));
        assert_eq!(calls, vec![1, 2, 4]);
    }

    /// Sampler whose total throughput is scripted per level.
    struct FakeSampler {
        totals: HashMap<usize, u64>,
    }

    impl Sampler for FakeSampler {
        async fn sample(&self, n: usize) -> Result<Results> {
            let total = *self.totals.get(&n).ok_or(Error::InvalidConcurrency)?;
            let description = SampleDescription::new(n, "fake", "scripted");
            Results::from_workers(
                description.clone(),
                (1..=n).map(|worker_id| WorkerResult {
                    description: description.clone(),
                    worker_id,
                    iterations: if worker_id == 1 { total } else { 0 },
                    elapsed: Duration::from_secs(1),
                }),
            )
        }
    }

    #[tokio::test]
    async fn probes_a_sampler_and_publishes_progress() {
        let sampler = FakeSampler {
            totals: HashMap::from([(1, 10), (2, 20), (4, 15), (3, 25)]),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = CapacityProbe::builder()
            .observer(ChannelObserver(tx))
            .build();

        let peak = probe
            .probe_sampler(&sampler, |r| r.messages_total())
            .await
            .unwrap();
        assert_eq!(peak, Peak { concurrency: 3, value: 25 });

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        let mut expected = Vec::new();
        for n in [1, 2, 4, 3] {
            expected.push(Event::Probing(n));
            expected.push(Event::Measured { concurrency: n });
        }
        expected.push(Event::PeakFound { concurrency: 3 });
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn probe_stops_on_sampler_failure() {
        let sampler = FakeSampler {
            totals: HashMap::from([(4, 10)]),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = CapacityProbe::builder()
            .power(2)
            .observer(ChannelObserver(tx))
            .build();

        let err = probe
            .probe_sampler(&sampler, |r| r.messages_total())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConcurrency));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                Event::Probing(4),
                Event::Measured { concurrency: 4 },
                Event::Probing(8)
            ]
        );
    }
}
