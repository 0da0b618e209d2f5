//! Running a complete probe.
//!
//! A [ProbeSession] owns every [PageBuffer] it loads and drives a
//! [PageTimer] through the protocol for its [Role]:
//!
//! - Tester: write every page twice, compare the totals.
//! - Sender: write the pages selected by the message, then wait.
//! - Receiver: write every page twice, time the second pass page-by-page,
//!   and decode the pattern of short/long writes.
//!
//! Buffers are released when the session is dropped, including when a
//! role bails out early with an error.

pub mod config;
pub mod report;

pub use config::*;
pub use report::*;

use log::{ debug, info, warn };

use crate::buffer::PageBuffer;
use crate::classify;
use crate::clock::ClockSource;
use crate::codec::{ self, BitPattern };
use crate::error::{ CodecError, Result };
use crate::timer::PageTimer;
use crate::trace::{ TraceOp, TraceWriter };
use crate::util::MemdupeEnv;

pub struct ProbeSession<C: ClockSource> {
    cfg: ProbeConfig,
    timer: PageTimer<C>,
    buffers: Vec<PageBuffer>,
}

impl <C: ClockSource> ProbeSession<C> {
    pub fn new(cfg: ProbeConfig, clock: C) -> Result<Self> {
        cfg.validate()?;
        let mut timer = PageTimer::new(clock, cfg.threshold, cfg.fill);
        if cfg.trace {
            timer.set_trace(TraceWriter::stderr());
        }
        Ok(Self { cfg, timer, buffers: Vec::new() })
    }

    /// Send trace records to `writer` instead of stderr.
    pub fn trace_to(mut self, writer: TraceWriter) -> Self {
        self.timer.set_trace(writer);
        self
    }

    pub fn config(&self) -> &ProbeConfig { &self.cfg }

    /// Load the primary buffer and any redundant copies. The first failure
    /// aborts; whatever was loaded so far is released on drop.
    fn load_buffers(&mut self) -> Result<()> {
        let ps = self.cfg.page_size;
        let hint = self.cfg.merge_hint;
        for idx in 0..self.cfg.buffer_count() {
            let buf = match &self.cfg.source {
                PageSource::File(path) => PageBuffer::load(path, ps, hint)?,
                PageSource::Fill { len, byte } => {
                    PageBuffer::filled(*len, *byte, ps, hint)?
                },
                PageSource::Random { len } => PageBuffer::random(*len, ps, hint)?,
            };
            debug!("Buffer {}: {:?}", idx, buf);
            self.buffers.push(buf);
        }
        Ok(())
    }

    /// Sleep through the dormant interval, logging what the scanner did.
    fn dormant(&mut self) -> Result<()> {
        let before = MemdupeEnv::sysfs_ksm_pages_shared();
        self.timer.dormant(self.cfg.dormant)?;
        let after = MemdupeEnv::sysfs_ksm_pages_shared();
        match (before, after) {
            (Ok(b), Ok(a)) => info!("KSM pages_shared: {} -> {}", b, a),
            (Err(e), _) | (_, Err(e)) => {
                debug!("KSM counters unavailable: {:?}", e)
            },
        }
        if let Ok(res) = self.buffers[0].residency() {
            debug!("Residency: {} of {} pages present, {} exclusive",
                res.present, res.pages, res.exclusive);
        }
        Ok(())
    }

    /// Run the protocol to completion.
    pub fn run(mut self) -> Result<SessionReport> {
        if let Some(core) = self.cfg.pinned_core {
            match MemdupeEnv::pin_to_core(core) {
                Ok(()) => info!("Pinned to core {}", core),
                Err(e) => warn!("Couldn't pin to core {}: {}", core, e),
            }
        }

        self.load_buffers()?;
        let report = match self.cfg.role {
            Role::Tester => self.run_tester()?,
            Role::Sender => self.run_sender()?,
            Role::Receiver => self.run_receiver()?,
        };
        self.release();
        Ok(report)
    }

    fn run_tester(&mut self) -> Result<SessionReport> {
        let page_count = self.buffers[0].page_count();
        let first = self.timer.first_pass(&mut self.buffers[0], None, None)?;
        self.dormant()?;
        let second = self.timer.second_pass(&mut self.buffers[0], None, None)?;
        self.timer.finish()?;

        let (verdict, aggregate) = classify::aggregate_verdict(
            first.total_ns, second.total_ns, self.cfg.threshold
        );
        match &aggregate {
            Some(agg) => info!("Second pass took {:.3}x as long as the first",
                agg.ratio),
            None => warn!("First pass took no time, can't compare passes"),
        }
        info!("Verdict: {}", verdict);

        let mut report = SessionReport::new(Role::Tester, page_count, first);
        report.second = Some(second);
        report.verdict = Some(verdict);
        report.aggregate = aggregate;
        Ok(report)
    }

    fn run_sender(&mut self) -> Result<SessionReport> {
        let page_count = self.buffers[0].page_count();
        let (pattern, overflow) = codec::fit(
            codec::encode(&self.cfg.message), page_count
        );
        if let Some(e) = overflow {
            warn!("{}, sending a truncated message", e);
        }
        info!("Sending \"{}\" as {}", codec::printable(&self.cfg.message),
            codec::render(&pattern));

        let first = self.timer.first_pass(&mut self.buffers[0],
            Some(&pattern), Some(TraceOp::Write))?;
        self.dormant()?;
        self.timer.finish()?;

        let mut report = SessionReport::new(Role::Sender, page_count, first);
        report.sent = Some(pattern);
        Ok(report)
    }

    fn run_receiver(&mut self) -> Result<SessionReport> {
        let page_count = self.buffers[0].page_count();
        let first = self.timer.first_pass(&mut self.buffers[0], None, None)?;
        self.dormant()?;
        let second = self.timer.second_pass(&mut self.buffers[0], None,
            Some(TraceOp::Rewrite))?;
        self.timer.finish()?;

        let bits = classify::classify_pages(&second.samples, self.cfg.threshold);
        let message = decode_prefix(&bits, self.cfg.message_len)?;
        info!("Received {}", codec::render(&bits));
        info!("Decoded \"{}\"", codec::printable(&message));

        let mut report = SessionReport::new(Role::Receiver, page_count, first);
        report.second = Some(second);
        report.received = Some(bits);
        report.message = Some(message);
        Ok(report)
    }

    /// Release every buffer. Safe to call more than once.
    fn release(&mut self) {
        let released = self.buffers.iter_mut()
            .map(|buf| buf.release())
            .filter(|released| *released)
            .count();
        if released != 0 {
            debug!("Released {} buffers", released);
        }
    }
}

impl <C: ClockSource> Drop for ProbeSession<C> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decode the first `message_len` bytes of a received pattern, or as many
/// whole bytes as it holds.
pub fn decode_prefix(bits: &BitPattern, message_len: Option<usize>)
    -> Result<Vec<u8>>
{
    let want = match message_len {
        Some(len) => match len.checked_mul(8) {
            Some(want) if want <= bits.len() => want,
            want => {
                return Err(CodecError::Short {
                    want: want.unwrap_or(usize::MAX),
                    have: bits.len(),
                }.into());
            },
        },
        None => bits.len() - bits.len() % 8,
    };
    Ok(codec::decode(&bits[..want])?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::{ MergeHint, PAGE_SIZE };
    use crate::classify::Verdict;
    use crate::clock::ScriptedClock;
    use crate::error::ProbeError;
    use std::time::Duration;

    fn quick(cfg: ProbeConfig) -> ProbeConfig {
        cfg.dormant(Duration::ZERO)
           .merge_hint(MergeHint::Off)
           .load_redundant_copies(false)
    }

    #[test]
    fn decode_prefix_lengths() {
        let mut bits = codec::encode(b"Hi");
        bits.push(true);
        assert_eq!(decode_prefix(&bits, None).unwrap(), b"Hi");
        assert_eq!(decode_prefix(&bits, Some(1)).unwrap(), b"H");
        assert!(matches!(decode_prefix(&bits, Some(3)),
            Err(ProbeError::Codec(CodecError::Short { want: 24, have: 17 }))));
    }

    #[test]
    fn decode_prefix_huge_length() {
        let bits = codec::encode(b"Hi");
        assert!(matches!(decode_prefix(&bits, Some(usize::MAX / 4)),
            Err(ProbeError::Codec(CodecError::Short { want: usize::MAX, have: 16 }))));
    }

    #[test]
    fn tester_detects_slow_second_pass() {
        let cfg = quick(ProbeConfig::tester()).fill_source(4 * PAGE_SIZE, b'a');
        let mut clk = ScriptedClock::new();
        clk.push_total(1000).push_total(3000);
        let report = ProbeSession::new(cfg, clk).unwrap().run().unwrap();
        assert_eq!(report.page_count, 4);
        assert_eq!(report.verdict, Some(Verdict::Merged));
        assert_eq!(report.aggregate.unwrap().ratio, 3.0);
    }

    #[test]
    fn tester_not_merged() {
        let cfg = quick(ProbeConfig::tester()).fill_source(4 * PAGE_SIZE, b'a');
        let mut clk = ScriptedClock::new();
        clk.push_total(1000).push_total(1100);
        let report = ProbeSession::new(cfg, clk).unwrap().run().unwrap();
        assert_eq!(report.verdict, Some(Verdict::NotMerged));
    }

    #[test]
    fn sender_clips_long_message() {
        // Two pages can't carry even one byte
        let cfg = quick(ProbeConfig::sender("Hi"))
            .fill_source(2 * PAGE_SIZE, b'a');
        let mut clk = ScriptedClock::new();
        // 0x48 starts with 01: one write
        clk.push_latencies(&[100]);
        let report = ProbeSession::new(cfg, clk).unwrap().run().unwrap();
        let sent = report.sent.unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(report.first.pages_written, 1);
        assert!(report.second.is_none());
    }

    #[test]
    fn random_source_control() {
        let cfg = quick(ProbeConfig::tester()).random_source(3 * PAGE_SIZE + 1)
            .redundant_copies(1);
        let mut clk = ScriptedClock::new();
        clk.push_total(1000).push_total(1000);
        let report = ProbeSession::new(cfg, clk).unwrap().run().unwrap();
        assert_eq!(report.page_count, 4);
        assert_eq!(report.verdict, Some(Verdict::NotMerged));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = ProbeConfig::tester().threshold(-1.0);
        assert!(matches!(ProbeSession::new(cfg, ScriptedClock::new()),
            Err(ProbeError::Config(_))));
    }

    #[test]
    fn missing_file_aborts() {
        let cfg = quick(ProbeConfig::tester())
            .file_path("/nonexistent/memdupe")
            .load_redundant_copies(true);
        let res = ProbeSession::new(cfg, ScriptedClock::new()).unwrap().run();
        assert!(matches!(res, Err(ProbeError::Io { .. })));
    }
}
