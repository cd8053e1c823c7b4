use crate::error::{Error, Result};

/// The best measurement seen so far.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Peak<V> {
    /// Smallest concurrency level that reached `value`
    pub concurrency: usize,
    pub value: V,
}

/// What the search wants after a measurement was reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<V> {
    /// Measure this concurrency level next
    Continue(usize),
    /// The search is over
    Done(Peak<V>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing measured yet
    Start { n: usize },
    /// `low` holds the maximum, `probe = 2 * low` is being measured
    Growth { low: usize, probe: usize },
    /// Walking `candidate` up towards the exclusive `high` bracket
    Refinement { candidate: usize, high: usize },
    Done,
}

/// Suspend/resume form of the capacity search.
///
/// The search decides *which* concurrency level to measure next; the caller decides *how*
/// to measure it. Ask [`CapacitySearch::next_probe`] for a level, measure it, and hand the
/// value back through [`CapacitySearch::report`] until it answers [`Step::Done`].
///
/// Throughput is assumed to rise with concurrency up to a peak and fall or flatten after
/// it. The search first doubles the level from `2^power` until a measurement fails to
/// beat the best so far, which brackets the peak between the last improving level `low`
/// and the failing level `high`. It then walks `low + 1, low + 2, ...` while below `high`,
/// stopping at the first level that does not improve.
///
/// Only strictly greater values count as an improvement. A tie ends the current phase,
/// so the smallest level reaching the maximum wins and a plateau beyond the bracket is
/// never explored.
///
/// ```rust
/// use mqprobe::probe::{CapacitySearch, Step};
///
/// let mut search = CapacitySearch::new(0).unwrap();
/// let mut order = Vec::new();
/// let peak = loop {
///     let n = search.next_probe().unwrap();
///     order.push(n);
///     let value = [0, 1, 2, 3, 1][n]; // measurements for 1..=4 workers
///     match search.report(n, value).unwrap() {
///         Step::Continue(_) => continue,
///         Step::Done(peak) => break peak,
///     }
/// };
/// assert_eq!(order, [1, 2, 4, 3]);
/// assert_eq!((peak.concurrency, peak.value), (3, 3));
/// ```
#[derive(Debug, Clone)]
pub struct CapacitySearch<V> {
    phase: Phase,
    best: Option<Peak<V>>,
    history: Vec<(usize, V)>,
}

impl<V: PartialOrd + Clone> CapacitySearch<V> {
    /// Start a search at `2^power` workers.
    pub fn new(power: u32) -> Result<Self> {
        let n = 1usize.checked_shl(power).ok_or(Error::InvalidPower(power))?;
        Ok(Self {
            phase: Phase::Start { n },
            best: None,
            history: Vec::new(),
        })
    }

    /// The level to measure next, or `None` once the search is done.
    pub fn next_probe(&self) -> Option<usize> {
        match self.phase {
            Phase::Start { n } => Some(n),
            Phase::Growth { probe, .. } => Some(probe),
            Phase::Refinement { candidate, .. } => Some(candidate),
            Phase::Done => None,
        }
    }

    /// Feed the measurement of level `n`, which must be the level from
    /// [`CapacitySearch::next_probe`].
    pub fn report(&mut self, n: usize, value: V) -> Result<Step<V>> {
        let expected = self.next_probe();
        if expected != Some(n) {
            return Err(Error::UnexpectedProbe { expected, got: n });
        }
        self.history.push((n, value.clone()));

        let improved = self.best.as_ref().is_none_or(|best| value > best.value);
        if improved {
            self.best = Some(Peak {
                concurrency: n,
                value,
            });
        }

        self.phase = match self.phase {
            Phase::Start { n } => grow_from(n),
            Phase::Growth { probe, .. } if improved => grow_from(probe),
            Phase::Growth { low, probe } => refine(low + 1, probe),
            Phase::Refinement { candidate, high } if improved => refine(candidate + 1, high),
            Phase::Refinement { .. } | Phase::Done => Phase::Done,
        };

        match (self.next_probe(), &self.best) {
            (Some(next), _) => Ok(Step::Continue(next)),
            (None, Some(best)) => Ok(Step::Done(best.clone())),
            (None, None) => Err(Error::UnexpectedProbe {
                expected: None,
                got: n,
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Best measurement so far.
    pub fn peak(&self) -> Option<&Peak<V>> {
        self.best.as_ref()
    }

    /// Every `(level, value)` reported so far, in probe order.
    pub fn history(&self) -> &[(usize, V)] {
        &self.history
    }
}

fn grow_from(low: usize) -> Phase {
    match low.checked_mul(2) {
        Some(probe) => Phase::Growth { low, probe },
        // no level left to double into
        None => Phase::Done,
    }
}

fn refine(candidate: usize, high: usize) -> Phase {
    if candidate < high {
        Phase::Refinement { candidate, high }
    } else {
        Phase::Done
    }
}
