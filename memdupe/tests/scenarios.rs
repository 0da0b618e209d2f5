//! End-to-end runs of complete sessions.
//!
//! None of these depend on the host actually merging pages: merging is
//! simulated by scripting the latencies a [ScriptedClock] reports.

use std::io::Write;
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use rand::prelude::*;

use memdupe::codec;
use memdupe::{
    MergeHint, ProbeConfig, ProbeSession, ProcessCpuClock, ScriptedClock,
    TraceOp, TraceRecord, TraceWriter, Verdict, PAGE_SIZE,
};

fn file_with_len(len: usize) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    f.write_all(&data).unwrap();
    f.flush().unwrap();
    f
}

fn quick(cfg: ProbeConfig, f: &tempfile::NamedTempFile) -> ProbeConfig {
    cfg.file_path(f.path())
       .dormant(Duration::ZERO)
       .merge_hint(MergeHint::BestEffort)
}

#[test]
fn twelve_thousand_bytes() {
    let f = file_with_len(12000);
    let cfg = quick(ProbeConfig::receiver(), &f);
    let report = ProbeSession::new(cfg, ProcessCpuClock::new()).unwrap()
        .run().unwrap();

    assert_eq!(report.page_count, 3);
    assert_eq!(report.first.pages_written, 3);
    assert!(report.first.total_ns > 0);

    let second = report.second.unwrap();
    assert_eq!(second.samples.len(), 3);
    let pages: Vec<usize> = second.samples.iter().map(|s| s.page_index).collect();
    assert_eq!(pages, vec![2, 1, 0]);
}

#[test]
fn tester_with_real_clock() {
    let f = file_with_len(12000);
    let cfg = quick(ProbeConfig::tester(), &f);
    let report = ProbeSession::new(cfg, ProcessCpuClock::new()).unwrap()
        .run().unwrap();
    assert_eq!(report.page_count, 3);
    assert!(report.verdict.is_some());
    assert_eq!(report.second.unwrap().pages_written, 3);
}

#[test]
fn codec_hi() {
    let bits = codec::encode(b"Hi");
    let got: Vec<u8> = bits.iter().by_vals().map(|b| b as u8).collect();
    assert_eq!(got, vec![0,1,0,0,1,0,0,0, 0,1,0,0,1,0,0,1]);
    assert_eq!(codec::decode(&bits).unwrap(), b"Hi");
}

#[test]
fn codec_roundtrip_random() {
    let mut rng = thread_rng();
    for _ in 0..64 {
        let len = rng.gen_range(0..32);
        let msg: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let bits = codec::encode(&msg);
        assert_eq!(bits.len(), msg.len() * 8);
        assert_eq!(codec::decode(&bits).unwrap(), msg);
    }
}

#[test]
fn empty_file_is_indeterminate() {
    let f = file_with_len(0);
    let cfg = quick(ProbeConfig::tester(), &f);
    let report = ProbeSession::new(cfg, ProcessCpuClock::new()).unwrap()
        .run().unwrap();
    assert_eq!(report.page_count, 0);
    assert_eq!(report.first.total_ns, 0);
    assert_eq!(report.verdict, Some(Verdict::Indeterminate));
    assert!(report.aggregate.is_none());
}

#[test]
fn empty_file_receives_nothing() {
    let f = file_with_len(0);
    let cfg = quick(ProbeConfig::receiver(), &f);
    let report = ProbeSession::new(cfg, ProcessCpuClock::new()).unwrap()
        .run().unwrap();
    assert_eq!(report.message, Some(vec![]));
}

/// Run a sender over `f` and return the pattern it wrote.
fn send(f: &tempfile::NamedTempFile, msg: &[u8]) -> memdupe::BitPattern {
    let ones = codec::encode(msg).count_ones();
    let mut clk = ScriptedClock::new();
    clk.push_latencies(&vec![100; ones]);
    let cfg = quick(ProbeConfig::sender(msg), f);
    let report = ProbeSession::new(cfg, clk).unwrap().run().unwrap();
    assert_eq!(report.first.pages_written, ones);
    assert!(report.second.is_none());
    report.sent.unwrap()
}

/// Run a receiver over `f` where the `i`-th page write takes
/// `latencies[i]` nanoseconds.
fn receive(f: &tempfile::NamedTempFile, latencies: &[u64], len: usize)
    -> (memdupe::BitPattern, Vec<u8>)
{
    let mut clk = ScriptedClock::new();
    clk.push_total(10_000).push_latencies(latencies);
    let cfg = quick(ProbeConfig::receiver(), f).message_len(Some(len));
    let report = ProbeSession::new(cfg, clk).unwrap().run().unwrap();
    (report.received.unwrap(), report.message.unwrap())
}

#[test]
fn sender_receiver_without_merging() {
    let f = file_with_len(16 * PAGE_SIZE - 10);
    let sent = send(&f, b"Hi");
    assert_eq!(sent, codec::encode(b"Hi"));

    // Nothing was merged, so every page costs the same
    let (bits, msg) = receive(&f, &[300; 16], 2);
    assert!(bits.not_any());
    assert_eq!(msg, vec![0, 0]);
    assert_ne!(msg, b"Hi");
}

#[test]
fn sender_receiver_with_merging() {
    let f = file_with_len(16 * PAGE_SIZE - 10);
    let sent = send(&f, b"Hi");

    // Pages the sender dirtied stayed private (short), the rest were merged
    // and have to be copied on write (long)
    let latencies: Vec<u64> = sent.iter().by_vals()
        .map(|dirty| if dirty { 100 } else { 10_000 })
        .collect();
    let (bits, msg) = receive(&f, &latencies, 2);
    assert_eq!(bits, sent);
    assert_eq!(msg, b"Hi");
}

#[test]
fn sender_receiver_with_noise() {
    let f = file_with_len(32 * PAGE_SIZE);
    let sent = send(&f, b"ok");
    let mut rng = thread_rng();
    let mut latencies: Vec<u64> = sent.iter().by_vals()
        .map(|dirty| if dirty {
            rng.gen_range(80..120)
        } else {
            rng.gen_range(9_000..11_000)
        })
        .collect();
    // Pages past the message
    latencies.extend((0..16).map(|_| rng.gen_range(9_000..11_000)));
    let (bits, msg) = receive(&f, &latencies, 2);
    assert_eq!(bits.len(), 32);
    assert_eq!(msg, b"ok");
}

/// A trace sink that can still be read after the session takes it.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);
impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}
impl SharedSink {
    /// Parse everything written so far, checking that it is pure CSV.
    fn records(&self) -> Vec<TraceRecord> {
        let out = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(TraceRecord::HEADER));
        lines.map(|l| l.parse().unwrap()).collect()
    }
}

#[test]
fn sender_traces_each_write() {
    let f = file_with_len(16 * PAGE_SIZE);
    let sink = SharedSink::default();
    let mut clk = ScriptedClock::new();
    // "Hi" has five bits set
    clk.push_latencies(&[100; 5]);
    let cfg = quick(ProbeConfig::sender(b"Hi"), &f).trace(true);
    ProbeSession::new(cfg, clk).unwrap()
        .trace_to(TraceWriter::new(Box::new(sink.clone())))
        .run().unwrap();

    let recs = sink.records();
    assert_eq!(recs.len(), 5);
    assert!(recs.iter().all(|r| r.op == TraceOp::Write && r.elapsed_ns == 100));
    // Bits 1, 4, 9, 12 and 15 of 01001000 01001001
    let pages: Vec<usize> = recs.iter().map(|r| r.page_index).collect();
    assert_eq!(pages, vec![14, 11, 6, 3, 0]);
}

#[test]
fn receiver_traces_each_page() {
    let f = file_with_len(16 * PAGE_SIZE);
    let sink = SharedSink::default();
    let lat: Vec<u64> = (0..16).map(|i| if i % 2 == 0 { 10_000 } else { 100 })
        .collect();
    let mut clk = ScriptedClock::new();
    clk.push_total(10_000).push_latencies(&lat);
    let cfg = quick(ProbeConfig::receiver(), &f);
    let report = ProbeSession::new(cfg, clk).unwrap()
        .trace_to(TraceWriter::new(Box::new(sink.clone())))
        .run().unwrap();

    let recs = sink.records();
    assert_eq!(recs.len(), 16);
    assert!(recs.iter().all(|r| r.op == TraceOp::Rewrite));
    let pages: Vec<usize> = recs.iter().map(|r| r.page_index).collect();
    assert_eq!(pages, (0..16).rev().collect::<Vec<_>>());
    let times: Vec<u64> = recs.iter().map(|r| r.elapsed_ns).collect();
    assert_eq!(times, lat);

    // The trace agrees with the decoded pattern
    let received = report.received.unwrap();
    for (rec, bit) in recs.iter().zip(received.iter().by_vals()) {
        assert_eq!(rec.long, !bit);
    }
}

#[test]
fn tester_writes_no_trace() {
    let f = file_with_len(4 * PAGE_SIZE);
    let sink = SharedSink::default();
    let mut clk = ScriptedClock::new();
    clk.push_total(1000).push_total(1000);
    let cfg = quick(ProbeConfig::tester(), &f);
    ProbeSession::new(cfg, clk).unwrap()
        .trace_to(TraceWriter::new(Box::new(sink.clone())))
        .run().unwrap();
    assert!(sink.0.lock().unwrap().is_empty());
}
