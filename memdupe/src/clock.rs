//! Process-local clocks used to time page writes.
//!
//! All of these report CPU time consumed by this process (not wall-clock
//! time) so that contention from other processes doesn't bias the
//! measurement. Readings never go backwards within the lifetime of a clock.

use std::collections::VecDeque;

use nix::time::{ clock_gettime, ClockId };
use perf_event::Builder;
use perf_event::events::Software;

use crate::error::ClockError;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// A monotonic source of nanosecond timestamps.
pub trait ClockSource {
    /// Return the current reading in nanoseconds.
    fn now(&mut self) -> Result<u64, ClockError>;

    /// A short name used in log output.
    fn name(&self) -> &'static str;
}

impl <C: ClockSource + ?Sized> ClockSource for Box<C> {
    fn now(&mut self) -> Result<u64, ClockError> { (**self).now() }
    fn name(&self) -> &'static str { (**self).name() }
}

/// `CLOCK_PROCESS_CPUTIME_ID`.
pub struct ProcessCpuClock {
    last: u64,
}
impl ProcessCpuClock {
    pub fn new() -> Self { Self { last: 0 } }
}
impl ClockSource for ProcessCpuClock {
    fn now(&mut self) -> Result<u64, ClockError> {
        let ts = clock_gettime(ClockId::CLOCK_PROCESS_CPUTIME_ID)
            .map_err(|e| ClockError::Read(e.desc().to_string()))?;
        let ns = ts.tv_sec() as u64 * NSEC_PER_SEC + ts.tv_nsec() as u64;
        self.last = self.last.max(ns);
        Ok(self.last)
    }
    fn name(&self) -> &'static str { "process-cputime" }
}

/// The perf 'task-clock' software event.
///
/// Requires `perf_event_paranoid` to allow self-monitoring.
pub struct TaskClock {
    ctr: perf_event::Counter,
    last: u64,
}
impl TaskClock {
    pub fn new() -> Result<Self, ClockError> {
        let mut ctr = Builder::new()
            .kind(Software::TASK_CLOCK)
            .build()
            .map_err(ClockError::Unavailable)?;
        ctr.enable().map_err(ClockError::Unavailable)?;
        Ok(Self { ctr, last: 0 })
    }
}
impl ClockSource for TaskClock {
    fn now(&mut self) -> Result<u64, ClockError> {
        let ns = self.ctr.read()
            .map_err(|e| ClockError::Read(e.to_string()))?;
        self.last = self.last.max(ns);
        Ok(self.last)
    }
    fn name(&self) -> &'static str { "task-clock" }
}

/// A clock replaying a scripted list of readings.
///
/// Used to simulate the latencies a pass would observe on pages that were
/// (or weren't) merged, without depending on the host actually running a
/// deduplication scanner. A `None` entry simulates a failed read. Once the
/// script runs out, every read fails with [ClockError::Exhausted].
pub struct ScriptedClock {
    readings: VecDeque<Option<u64>>,
    cursor: u64,
    last: u64,
}
impl ScriptedClock {
    pub fn new() -> Self {
        Self { readings: VecDeque::new(), cursor: 0, last: 0 }
    }

    /// Append a raw reading.
    pub fn push(&mut self, ns: u64) -> &mut Self {
        self.cursor = self.cursor.max(ns);
        self.readings.push_back(Some(ns));
        self
    }

    /// Append a failed read.
    pub fn push_fault(&mut self) -> &mut Self {
        self.readings.push_back(None);
        self
    }

    /// Append the two readings taken by a pass without per-page
    /// instrumentation, `total_ns` apart.
    pub fn push_total(&mut self, total_ns: u64) -> &mut Self {
        let start = self.cursor + 1;
        self.push(start).push(start + total_ns)
    }

    /// Append the readings taken by an instrumented pass where the `i`-th
    /// written page takes `latencies[i]` nanoseconds.
    pub fn push_latencies(&mut self, latencies: &[u64]) -> &mut Self {
        let start = self.cursor + 1;
        self.push(start);
        for lat in latencies {
            let t1 = self.cursor + 1;
            self.push(t1).push(t1 + lat);
        }
        let end = self.cursor + 1;
        self.push(end)
    }

    /// Number of readings left in the script.
    pub fn remaining(&self) -> usize { self.readings.len() }
}
impl ClockSource for ScriptedClock {
    fn now(&mut self) -> Result<u64, ClockError> {
        match self.readings.pop_front() {
            Some(Some(ns)) => {
                self.last = self.last.max(ns);
                Ok(self.last)
            },
            Some(None) => Err(ClockError::Read("scripted fault".to_string())),
            None => Err(ClockError::Exhausted),
        }
    }
    fn name(&self) -> &'static str { "scripted" }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn process_clock_is_monotonic() {
        let mut clk = ProcessCpuClock::new();
        let mut prev = clk.now().unwrap();
        for _ in 0..10_000 {
            let now = clk.now().unwrap();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn process_clock_counts_cpu_time() {
        let mut clk = ProcessCpuClock::new();
        let start = clk.now().unwrap();
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = std::hint::black_box(acc.wrapping_add(i * i));
        }
        let end = clk.now().unwrap();
        assert!(end > start, "acc={}", acc);
    }

    #[test]
    fn scripted_latencies() {
        let mut clk = ScriptedClock::new();
        clk.push_latencies(&[10, 300]);
        assert_eq!(clk.remaining(), 6);

        let t0 = clk.now().unwrap();
        let a1 = clk.now().unwrap();
        let a2 = clk.now().unwrap();
        let b1 = clk.now().unwrap();
        let b2 = clk.now().unwrap();
        let t1 = clk.now().unwrap();
        assert_eq!(a2 - a1, 10);
        assert_eq!(b2 - b1, 300);
        assert!(t1 > t0);
        assert!(matches!(clk.now(), Err(ClockError::Exhausted)));
    }

    #[test]
    fn scripted_never_goes_backwards() {
        let mut clk = ScriptedClock::new();
        clk.push(100).push(50).push_fault().push(120);
        assert_eq!(clk.now().unwrap(), 100);
        assert_eq!(clk.now().unwrap(), 100);
        assert!(matches!(clk.now(), Err(ClockError::Read(_))));
        assert_eq!(clk.now().unwrap(), 120);
    }
}
