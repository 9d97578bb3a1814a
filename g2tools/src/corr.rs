//! Cross-correlation of channel A and channel B arrival times over a
//! sliding window of periods
//!
//! Every retained period contributes the full outer difference
//! `a[i] - b[j]` of its two timestamp sets. Differences strictly inside
//! `(-tau_max_ns, tau_max_ns)` are binned, everything else is dropped. The
//! cumulative histogram is always rebuilt from scratch, so one recompute
//! costs `O(N * k^2)` for `N` retained periods of at most `k = 6` times per
//! channel.

use crate::{Bin, PeriodRecord};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Largest bin count a [`HistogramState`] will allocate
pub const MAX_BINS: usize = 1 << 24;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("invalid binning: tau_max_ns = {tau_max_ns}, bin_width_ns = {bin_width_ns}")]
    Binning { tau_max_ns: f64, bin_width_ns: f64 },
    #[error("non-finite time difference in period {period}")]
    NonFinite { period: usize },
    #[error("count overflow in bin {bin}")]
    Overflow { bin: usize },
}

/// Fixed-width bins symmetric about zero and their cumulative counts
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramState {
    /// `counts.len() + 1` edges from `-tau_max_ns` to `tau_max_ns`
    pub bin_edges: Vec<f64>,
    pub counts: Vec<u64>,
    pub tau_max_ns: f64,
    pub bin_width_ns: f64,
}

/// Number of bins for a delay range and requested bin width. Exact halves
/// round to the even count.
pub fn num_bins(tau_max_ns: f64, bin_width_ns: f64) -> Result<usize, ComputeError> {
    let bad = ComputeError::Binning { tau_max_ns, bin_width_ns };
    if !(tau_max_ns.is_finite() && bin_width_ns.is_finite())
        || tau_max_ns <= 0.0
        || bin_width_ns <= 0.0
    {
        return Err(bad);
    }
    let n = (2.0 * tau_max_ns / bin_width_ns).round_ties_even();
    if !(n >= 1.0 && n <= MAX_BINS as f64) {
        return Err(bad);
    }
    Ok(n as usize)
}

/// `n + 1` evenly spaced edges from `lo` to `hi`, both endpoints exact
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    let step = (hi - lo) / n as f64;
    let mut edges: Vec<f64> = (0..n).map(|i| lo + i as f64 * step).collect();
    edges.push(hi);
    return edges;
}

impl HistogramState {
    /// Empty histogram for the given delay range and bin width
    pub fn new(tau_max_ns: f64, bin_width_ns: f64) -> Result<Self, ComputeError> {
        let n = num_bins(tau_max_ns, bin_width_ns)?;
        Ok(HistogramState {
            bin_edges: linspace(-tau_max_ns, tau_max_ns, n),
            counts: vec![0; n],
            tau_max_ns,
            bin_width_ns,
        })
    }

    /// Same binning, all counts zero
    pub fn cleared(&self) -> Self {
        HistogramState {
            counts: vec![0; self.counts.len()],
            bin_edges: self.bin_edges.clone(),
            ..*self
        }
    }

    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bin index of a delay, using half-open `[lo, hi)` bins. Delays outside
    /// the open interval `(-tau_max_ns, tau_max_ns)` have no bin.
    pub fn bin_index(&self, d: f64) -> Option<usize> {
        let tau = self.tau_max_ns;
        if !(d > -tau && d < tau) {
            return None;
        }
        let n = self.counts.len();
        let step = 2.0 * tau / n as f64;
        let mut i = (((d + tau) / step) as usize).min(n - 1);
        // Correct float error in the estimate against the actual edges
        while i > 0 && d < self.bin_edges[i] {
            i -= 1;
        }
        while i + 1 < n && d >= self.bin_edges[i + 1] {
            i += 1;
        }
        Some(i)
    }

    /// Add all pairwise differences of one period into `counts`
    fn accumulate(&self, period: usize, p: &PeriodRecord, counts: &mut [u64]) -> Result<(), ComputeError> {
        for &a in &p.channel_a {
            for &b in &p.channel_b {
                let d = a - b;
                if !d.is_finite() {
                    return Err(ComputeError::NonFinite { period });
                }
                if let Some(bin) = self.bin_index(d) {
                    counts[bin] = counts[bin]
                        .checked_add(1)
                        .ok_or(ComputeError::Overflow { bin })?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild the counts from `periods`, with this state's binning
    pub fn histogram<P>(&self, periods: &[P]) -> Result<HistogramState, ComputeError>
    where
        P: AsRef<PeriodRecord> + Sync,
    {
        let n = self.counts.len();
        let counts = periods
            .par_iter()
            .enumerate()
            .try_fold(
                || vec![0u64; n],
                |mut acc, (i, p)| {
                    self.accumulate(i, p.as_ref(), &mut acc)?;
                    Ok::<_, ComputeError>(acc)
                },
            )
            .try_reduce(
                || vec![0u64; n],
                |mut acc, part| {
                    for (bin, (x, y)) in acc.iter_mut().zip(part).enumerate() {
                        *x = x.checked_add(y).ok_or(ComputeError::Overflow { bin })?;
                    }
                    Ok::<_, ComputeError>(acc)
                },
            )?;
        Ok(HistogramState {
            counts,
            bin_edges: self.bin_edges.clone(),
            ..*self
        })
    }

    /// `(bin_start_ns, count)` pairs
    pub fn bins(&self) -> impl Iterator<Item = Bin<f64, u64>> + '_ {
        self.bin_edges
            .iter()
            .zip(self.counts.iter())
            .map(|(&x, &y)| Bin { x, y })
    }

    /// Counts normalised to `g2 = counts / (periods * <|a|> * <|b|> * bin_width)`.
    /// All zero when there is nothing to normalise by.
    pub fn g2<'a, I>(&self, periods: I) -> Vec<f64>
    where
        I: IntoIterator<Item = &'a PeriodRecord>,
    {
        let (mut n, mut sum_a, mut sum_b) = (0usize, 0usize, 0usize);
        for p in periods {
            n += 1;
            sum_a += p.channel_a.len();
            sum_b += p.channel_b.len();
        }
        let norm = if n == 0 {
            0.0
        } else {
            n as f64 * (sum_a as f64 / n as f64) * (sum_b as f64 / n as f64) * self.bin_width_ns
        };
        if norm == 0.0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts.iter().map(|&c| c as f64 / norm).collect()
    }
}

impl AsRef<PeriodRecord> for PeriodRecord {
    fn as_ref(&self) -> &PeriodRecord {
        self
    }
}

/// Retained periods at one instant, detached from the live window so the
/// histogram can be computed without holding any lock
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub generation: u64,
    pub periods: Vec<Arc<PeriodRecord>>,
    /// Periods pushed into the window when the snapshot was taken
    pushed: u64,
    binning: HistogramState,
}

impl Snapshot {
    pub fn compute(&self) -> Result<HistogramState, ComputeError> {
        self.binning.histogram(&self.periods)
    }
}

/// Bounded FIFO of periods with the last good histogram over them
#[derive(Clone, Debug)]
pub struct CorrelationWindow {
    periods: VecDeque<Arc<PeriodRecord>>,
    capacity: usize,
    /// Bumped whenever the window is cleared
    generation: u64,
    /// Periods pushed since creation, and how many of them `state` covers
    pushed: u64,
    state_pushed: u64,
    state: HistogramState,
}

impl CorrelationWindow {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize, tau_max_ns: f64, bin_width_ns: f64) -> Result<Self, ComputeError> {
        let capacity = capacity.max(1);
        Ok(CorrelationWindow {
            periods: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            generation: 0,
            pushed: 0,
            state_pushed: 0,
            state: HistogramState::new(tau_max_ns, bin_width_ns)?,
        })
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn periods(&self) -> impl Iterator<Item = &PeriodRecord> + '_ {
        self.periods.iter().map(|p| &**p)
    }

    /// Last successfully computed histogram
    pub fn state(&self) -> &HistogramState {
        &self.state
    }

    /// Append a period, evicting the oldest once over capacity
    pub fn push(&mut self, period: PeriodRecord) {
        self.periods.push_back(Arc::new(period));
        self.pushed += 1;
        while self.periods.len() > self.capacity {
            self.periods.pop_front();
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            generation: self.generation,
            periods: self.periods.iter().cloned().collect(),
            pushed: self.pushed,
            binning: self.state.cleared(),
        }
    }

    /// Store a histogram computed from `snap`. Results from before the last
    /// reset, or older than the stored histogram, are refused.
    pub fn commit(&mut self, snap: &Snapshot, state: HistogramState) -> bool {
        if snap.generation != self.generation || snap.pushed < self.state_pushed {
            return false;
        }
        self.state = state;
        self.state_pushed = snap.pushed;
        true
    }

    /// Rebuild the histogram from every retained period. On error the
    /// previous histogram is kept and still available from [`state`].
    ///
    /// [`state`]: CorrelationWindow::state
    pub fn recompute(&mut self) -> Result<HistogramState, ComputeError> {
        let snap = self.snapshot();
        let state = snap.compute()?;
        self.state = state.clone();
        self.state_pushed = snap.pushed;
        Ok(state)
    }

    /// Drop all periods and counts, keeping the binning
    pub fn reset(&mut self) {
        self.periods.clear();
        self.generation += 1;
        self.state = self.state.cleared();
        self.state_pushed = self.pushed;
    }

    /// Drop all periods and counts and switch to a new binning
    pub fn rebin(&mut self, tau_max_ns: f64, bin_width_ns: f64) -> Result<(), ComputeError> {
        let state = HistogramState::new(tau_max_ns, bin_width_ns)?;
        self.reset();
        self.state = state;
        Ok(())
    }

    /// Normalised g2 of the current histogram over the retained periods
    pub fn g2(&self) -> Vec<f64> {
        self.state.g2(self.periods())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges() {
        let h = HistogramState::new(50.0, 10.0).unwrap();
        assert_eq!(h.num_bins(), 10);
        assert_eq!(h.bin_edges.len(), h.counts.len() + 1);
        assert_eq!(h.bin_edges[0], -50.0);
        assert_eq!(h.bin_edges[5], 0.0);
        assert_eq!(h.bin_edges[10], 50.0);

        // Width that does not divide the range is rounded to a whole number of bins
        let h = HistogramState::new(1.0, 0.3).unwrap();
        assert_eq!(h.num_bins(), 7);
        assert_eq!(*h.bin_edges.last().unwrap(), 1.0);

        // Ties go to the even count
        let h = HistogramState::new(1.25, 1.0).unwrap();
        assert_eq!(h.num_bins(), 2);
        assert_eq!(h.bin_edges, vec![-1.25, 0.0, 1.25]);
        assert_eq!(num_bins(1.75, 1.0), Ok(4));
    }

    #[test]
    fn bad_binning() {
        for (tau, w) in [(0.0, 1.0), (1.0, 0.0), (-1.0, 1.0), (f64::NAN, 1.0), (1.0, f64::INFINITY), (1.0, 10.0)] {
            assert!(HistogramState::new(tau, w).is_err(), "{} {}", tau, w);
        }
    }

    #[test]
    fn bin_count_is_capped() {
        let tau = (MAX_BINS / 2) as f64;
        assert_eq!(num_bins(tau, 1.0), Ok(MAX_BINS));
        assert_eq!(
            num_bins(tau, 0.5),
            Err(ComputeError::Binning { tau_max_ns: tau, bin_width_ns: 0.5 })
        );
        assert!(CorrelationWindow::new(10, 1e9, 1e-3).is_err());
    }

    #[test]
    fn half_open_bins() {
        let h = HistogramState::new(50.0, 10.0).unwrap();
        assert_eq!(h.bin_index(-50.0), None);
        assert_eq!(h.bin_index(50.0), None);
        assert_eq!(h.bin_index(-49.999), Some(0));
        assert_eq!(h.bin_index(-40.0), Some(1));
        assert_eq!(h.bin_index(-0.0), Some(5));
        assert_eq!(h.bin_index(0.0), Some(5));
        assert_eq!(h.bin_index(-1e-12), Some(4));
        assert_eq!(h.bin_index(49.999), Some(9));
        assert_eq!(h.bin_index(f64::NAN), None);

        // Every edge starts its own bin despite float error in the step
        let h = HistogramState::new(1.0, 0.1).unwrap();
        for (i, &e) in h.bin_edges[..h.num_bins()].iter().enumerate().skip(1) {
            assert_eq!(h.bin_index(e), Some(i));
        }
    }

    #[test]
    fn non_finite_keeps_previous_state() {
        let mut w = CorrelationWindow::new(4, 50.0, 10.0).unwrap();
        w.push(PeriodRecord { channel_a: vec![10.0], channel_b: vec![12.0] });
        let good = w.recompute().unwrap();
        assert_eq!(good.total(), 1);

        w.push(PeriodRecord { channel_a: vec![f64::INFINITY], channel_b: vec![1.0] });
        assert_eq!(w.recompute(), Err(ComputeError::NonFinite { period: 1 }));
        assert_eq!(w.state(), &good);
    }

    #[test]
    fn commit_refuses_stale_generation() {
        let mut w = CorrelationWindow::new(4, 50.0, 10.0).unwrap();
        w.push(PeriodRecord { channel_a: vec![10.0], channel_b: vec![12.0] });
        let snap = w.snapshot();
        w.reset();
        let stale = snap.compute().unwrap();
        assert_eq!(stale.total(), 1);
        assert!(!w.commit(&snap, stale));
        assert_eq!(w.state().total(), 0);
        assert!(w.is_empty());

        let snap = w.snapshot();
        assert!(w.commit(&snap, snap.compute().unwrap()));
    }

    #[test]
    fn commit_refuses_older_snapshot() {
        let mut w = CorrelationWindow::new(4, 50.0, 10.0).unwrap();
        w.push(PeriodRecord { channel_a: vec![10.0], channel_b: vec![12.0] });
        let old = w.snapshot();
        w.push(PeriodRecord { channel_a: vec![10.0], channel_b: vec![12.0] });
        let new = w.snapshot();
        assert!(w.commit(&new, new.compute().unwrap()));
        assert!(!w.commit(&old, old.compute().unwrap()));
        assert_eq!(w.state().total(), 2);
    }

    #[test]
    fn g2_normalisation() {
        let mut w = CorrelationWindow::new(4, 50.0, 10.0).unwrap();
        assert_eq!(w.g2(), vec![0.0; 10]);
        w.push(PeriodRecord { channel_a: vec![10.0, 20.0], channel_b: vec![12.0, 21.0] });
        w.recompute().unwrap();
        // 1 period * 2 * 2 * 10 ns
        let g2 = w.g2();
        assert_eq!(g2[4], 2.0 / 40.0);
        assert!((g2.iter().sum::<f64>() - 0.1).abs() < 1e-12);
    }
}
