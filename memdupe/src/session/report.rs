use crate::classify::{ AggregateVerdict, Verdict };
use crate::codec::{ self, BitPattern };
use crate::session::config::Role;
use crate::stats;
use crate::timer::PassResult;

/// Everything a [ProbeSession](crate::session::ProbeSession) measured.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub role: Role,

    /// Number of pages in the probed buffer.
    pub page_count: usize,

    pub first: PassResult,

    /// Absent for a sender.
    pub second: Option<PassResult>,

    /// Tester only.
    pub verdict: Option<Verdict>,
    pub aggregate: Option<AggregateVerdict>,

    /// The pattern a sender actually wrote (after clipping to the buffer).
    pub sent: Option<BitPattern>,

    /// The raw pattern recovered by a receiver, one bit per page.
    pub received: Option<BitPattern>,

    /// The message recovered by a receiver.
    pub message: Option<Vec<u8>>,
}

impl SessionReport {
    pub fn new(role: Role, page_count: usize, first: PassResult) -> Self {
        Self {
            role,
            page_count,
            first,
            second: None,
            verdict: None,
            aggregate: None,
            sent: None,
            received: None,
            message: None,
        }
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("role: {}", self.role),
            format!("pages: {}", self.page_count),
            format!("first pass: {}", stats::summarize(&self.first)),
        ];
        if let Some(second) = &self.second {
            lines.push(format!("second pass: {}", stats::summarize(second)));
        }
        if let Some(agg) = &self.aggregate {
            lines.push(format!("ratio: {:.3} (threshold {})", agg.ratio,
                agg.threshold));
        }
        if let Some(v) = &self.verdict {
            lines.push(format!("verdict: {}", v));
        }
        if let Some(sent) = &self.sent {
            lines.push(format!("sent: {}", codec::render(sent)));
        }
        if let Some(recv) = &self.received {
            lines.push(format!("received: {}", codec::render(recv)));
        }
        if let Some(msg) = &self.message {
            lines.push(format!("message: \"{}\"", codec::printable(msg)));
        }
        lines.join("\n")
    }
}
