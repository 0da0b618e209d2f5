//! Turning write latencies into a verdict.
//!
//! Two modes are supported:
//!
//! - Aggregate: compare the total time of the second pass against the
//!   first. If the ratio exceeds the threshold, pages were probably merged
//!   during the dormant interval (every write had to break a copy-on-write
//!   mapping).
//!
//! - Per-page: each write is compared against the running mean of the
//!   writes so far in the same pass. A write that takes longer than
//!   `threshold * mean` was probably a copy-on-write fault on a merged page.
//!   The recovered bit for a page is the *complement* of that flag: pages
//!   the sender dirtied come back as `1` (not merged), untouched pages come
//!   back as `0` (merged). Senders and receivers agree on this polarity, so
//!   don't flip it on one side only.

use crate::codec::BitPattern;
use crate::error::{ ProbeError, Result };
use crate::timer::LatencySample;

/// Online mean over the latencies observed so far in a pass.
///
/// The decision for a sample only depends on that sample and the ones
/// observed before it; the first few samples of a pass bootstrap the mean
/// and are less reliable.
#[derive(Clone, Copy, Debug)]
pub struct RunningMean {
    sum: u128,
    count: u64,
    threshold: f64,
}
impl RunningMean {
    pub fn new(threshold: f64) -> Self {
        Self { sum: 0, count: 0, threshold }
    }

    /// Fold `elapsed_ns` into the mean, then return true if it was
    /// anomalously long.
    pub fn observe(&mut self, elapsed_ns: u64) -> bool {
        self.sum += elapsed_ns as u128;
        self.count += 1;
        (elapsed_ns as f64) > self.threshold * self.mean()
    }

    /// The mean of all observed samples (zero before the first one).
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum as f64 / self.count as f64
    }

    pub fn count(&self) -> u64 { self.count }
}

/// Outcome of a probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Memory deduplication probably occurred.
    Merged,
    /// Memory deduplication did not occur.
    NotMerged,
    /// The timings can't support either conclusion.
    Indeterminate,
}
impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merged => write!(f, "memory deduplication probably occurred"),
            Self::NotMerged => write!(f, "memory deduplication did not occur"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Result of comparing the totals of two passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregateVerdict {
    pub first_ns: u64,
    pub second_ns: u64,
    pub ratio: f64,
    pub threshold: f64,
    pub detected: bool,
}
impl AggregateVerdict {
    pub fn verdict(&self) -> Verdict {
        if self.detected { Verdict::Merged } else { Verdict::NotMerged }
    }
}

/// `second_ns / first_ns`, failing with [ProbeError::DivisionByZero] when
/// the first pass took no time.
pub fn ratio(first_ns: u64, second_ns: u64) -> Result<f64> {
    if first_ns == 0 {
        return Err(ProbeError::DivisionByZero);
    }
    Ok(second_ns as f64 / first_ns as f64)
}

/// Aggregate mode.
pub fn classify_aggregate(first_ns: u64, second_ns: u64, threshold: f64)
    -> Result<AggregateVerdict>
{
    let ratio = ratio(first_ns, second_ns)?;
    Ok(AggregateVerdict {
        first_ns,
        second_ns,
        ratio,
        threshold,
        detected: ratio > threshold,
    })
}

/// Aggregate mode, with a degenerate first pass reported as
/// [Verdict::Indeterminate] instead of an error.
pub fn aggregate_verdict(first_ns: u64, second_ns: u64, threshold: f64)
    -> (Verdict, Option<AggregateVerdict>)
{
    match classify_aggregate(first_ns, second_ns, threshold) {
        Ok(v) => (v.verdict(), Some(v)),
        Err(_) => (Verdict::Indeterminate, None),
    }
}

/// Compute the "was-long" flag for each latency, in order.
pub fn long_flags(latencies: impl IntoIterator<Item=u64>, threshold: f64)
    -> Vec<bool>
{
    let mut mean = RunningMean::new(threshold);
    latencies.into_iter().map(|ns| mean.observe(ns)).collect()
}

/// Per-page mode: recover one bit per sample (the complement of its
/// was-long flag).
pub fn classify_pages(samples: &[LatencySample], threshold: f64)
    -> BitPattern
{
    long_flags(samples.iter().map(|s| s.elapsed_ns), threshold)
        .into_iter().map(|long| !long).collect()
}
