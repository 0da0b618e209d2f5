//! Timed write passes over a [PageBuffer].
//!
//! A probe is made of two write passes separated by a dormant interval:
//!
//! ```text
//! Idle -> FirstPass -> Dormant -> SecondPass -> Done
//!                         \--------------------> Done   (sender)
//! ```
//!
//! The dormant interval only exists to give an external deduplication
//! scanner time to find and merge identical pages. An interval that is too
//! short just means nothing gets merged; it isn't an error.
//!
//! Pages are always visited from the last page down to the first. Mask
//! bit `i` controls the `i`-th visited page (page `page_count - 1 - i`).

use std::time::Duration;

use log::{ debug, info, warn };

use crate::buffer::PageBuffer;
use crate::classify::RunningMean;
use crate::clock::ClockSource;
use crate::codec::BitPatternSlice;
use crate::error::{ ProbeError, Result };
use crate::trace::{ TraceOp, TraceRecord, TraceWriter };

/// Where a [PageTimer] is in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    FirstPass,
    Dormant,
    SecondPass,
    Done,
}
impl TimerState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FirstPass => "after the first pass",
            Self::Dormant => "dormant",
            Self::SecondPass => "after the second pass",
            Self::Done => "done",
        }
    }
}

/// Latency of a single instrumented page write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencySample {
    /// Position in the visiting order (also the mask bit index).
    pub step: usize,
    pub page_index: usize,
    /// Zero if the clock couldn't be read.
    pub elapsed_ns: u64,
    /// Longer than `threshold` times the running mean at this point.
    pub long: bool,
}

/// Result of one write pass.
#[derive(Clone, Debug, Default)]
pub struct PassResult {
    /// Total time for the pass (zero if no page was visited).
    pub total_ns: u64,
    /// Number of pages actually written.
    pub pages_written: usize,
    /// One sample per written page, in visiting order. Empty unless the
    /// pass was instrumented.
    pub samples: Vec<LatencySample>,
}
impl PassResult {
    pub fn latencies(&self) -> Vec<u64> {
        self.samples.iter().map(|s| s.elapsed_ns).collect()
    }
}

/// Drives the write passes of a probe.
pub struct PageTimer<C: ClockSource> {
    clock: C,
    threshold: f64,
    fill: u8,
    state: TimerState,
    trace: Option<TraceWriter>,
}

impl <C: ClockSource> PageTimer<C> {
    pub fn new(clock: C, threshold: f64, fill: u8) -> Self {
        Self { clock, threshold, fill, state: TimerState::Idle, trace: None }
    }

    /// Emit a [TraceRecord] for every instrumented write.
    pub fn trace(mut self, writer: TraceWriter) -> Self {
        self.set_trace(writer);
        self
    }

    pub fn set_trace(&mut self, writer: TraceWriter) {
        self.trace = Some(writer);
    }

    pub fn state(&self) -> TimerState { self.state }
    pub fn clock(&self) -> &C { &self.clock }

    fn expect(&self, expected: TimerState) -> Result<()> {
        if self.state != expected {
            return Err(ProbeError::State {
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        Ok(())
    }

    fn read_clock(&mut self) -> Option<u64> {
        match self.clock.now() {
            Ok(ns) => Some(ns),
            Err(e) => {
                warn!("{} clock: {}", self.clock.name(), e);
                None
            },
        }
    }

    /// Perform a single write pass over `buf`.
    ///
    /// - With no `mask`, every page is written.
    /// - With a `mask`, the `i`-th visited page is written only if bit `i`
    ///   is set. Pages past the end of the mask are left alone.
    ///
    /// When `instrument` is set, each write is timed individually and
    /// produces a [LatencySample] (and a trace record, if tracing). A failed
    /// clock read turns that sample into a zero.
    pub fn run_pass(&mut self,
        buf: &mut PageBuffer,
        mask: Option<&BitPatternSlice>,
        instrument: Option<TraceOp>,
    ) -> PassResult
    {
        let pages = buf.page_count();
        if pages == 0 {
            return PassResult::default();
        }

        let mut mean = RunningMean::new(self.threshold);
        let mut samples = Vec::new();
        let mut pages_written = 0;

        let t_init = self.read_clock();
        for (step, page_index) in (0..pages).rev().enumerate() {
            let dowrite = match mask {
                Some(m) => step < m.len() && m[step],
                None => true,
            };
            if !dowrite {
                continue;
            }

            if let Some(op) = instrument {
                let t1 = self.read_clock();
                buf.write_byte(page_index, self.fill);
                let t2 = self.read_clock();
                let elapsed_ns = match (t1, t2) {
                    (Some(t1), Some(t2)) => t2.saturating_sub(t1),
                    _ => 0,
                };
                let long = mean.observe(elapsed_ns);
                let sample = LatencySample { step, page_index, elapsed_ns, long };
                if let Some(trace) = self.trace.as_mut() {
                    trace.record(&TraceRecord { op, page_index, elapsed_ns, long });
                }
                samples.push(sample);
            } else {
                buf.write_byte(page_index, self.fill);
            }
            pages_written += 1;
        }
        let t_end = self.read_clock();

        let total_ns = match (t_init, t_end) {
            (Some(t0), Some(t1)) => t1.saturating_sub(t0),
            _ => samples.iter().map(|s| s.elapsed_ns).sum(),
        };
        if let Some(trace) = self.trace.as_mut() {
            trace.flush();
        }
        debug!("Pass: {} of {} pages written, {} samples, {} ns",
            pages_written, pages, samples.len(), total_ns);

        PassResult { total_ns, pages_written, samples }
    }

    /// Run the first pass. The timer must be idle.
    pub fn first_pass(&mut self,
        buf: &mut PageBuffer,
        mask: Option<&BitPatternSlice>,
        instrument: Option<TraceOp>,
    ) -> Result<PassResult>
    {
        self.expect(TimerState::Idle)?;
        let res = self.run_pass(buf, mask, instrument);
        self.state = TimerState::FirstPass;
        info!("Wrote {} pages once in {} ns", res.pages_written, res.total_ns);
        Ok(res)
    }

    /// Sleep through the dormant interval. Must follow the first pass.
    pub fn dormant(&mut self, interval: Duration) -> Result<()> {
        self.expect(TimerState::FirstPass)?;
        self.state = TimerState::Dormant;
        info!("Sleeping for {:?}", interval);
        std::thread::sleep(interval);
        Ok(())
    }

    /// Run the second pass. Must follow the dormant interval.
    pub fn second_pass(&mut self,
        buf: &mut PageBuffer,
        mask: Option<&BitPatternSlice>,
        instrument: Option<TraceOp>,
    ) -> Result<PassResult>
    {
        self.expect(TimerState::Dormant)?;
        let res = self.run_pass(buf, mask, instrument);
        self.state = TimerState::SecondPass;
        info!("Wrote {} pages again in {} ns", res.pages_written, res.total_ns);
        Ok(res)
    }

    /// Finish the protocol.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            TimerState::Dormant | TimerState::SecondPass => {
                self.state = TimerState::Done;
                Ok(())
            },
            _ => Err(ProbeError::State {
                expected: "dormant or after the second pass",
                found: self.state.name(),
            }),
        }
    }
}
