//! Per-page timing records for offline analysis.
//!
//! Records are written as CSV with the header `Op,Page,Time,Long?`, one
//! line per instrumented page write.

use std::io::Write;
use std::str::FromStr;

use log::warn;

/// The pass a record was taken in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceOp {
    /// A sender dirtying a page (`W`).
    Write,
    /// A receiver re-writing a page after the dormant interval (`R`).
    Rewrite,
}
impl TraceOp {
    pub fn tag(&self) -> char {
        match self {
            Self::Write => 'W',
            Self::Rewrite => 'R',
        }
    }
}

/// One timed page write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub op: TraceOp,
    pub page_index: usize,
    pub elapsed_ns: u64,
    pub long: bool,
}
impl TraceRecord {
    pub const HEADER: &'static str = "Op,Page,Time,Long?";
}
impl std::fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.op.tag(), self.page_index,
            self.elapsed_ns, self.long as u8)
    }
}
impl FromStr for TraceRecord {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(',').collect();
        if fields.len() != 4 {
            return Err(format!("expected 4 fields, got {}", fields.len()));
        }
        let op = match fields[0] {
            "W" => TraceOp::Write,
            "R" => TraceOp::Rewrite,
            x => return Err(format!("unknown op '{}'", x)),
        };
        let page_index = fields[1].parse()
            .map_err(|e| format!("bad page '{}': {}", fields[1], e))?;
        let elapsed_ns = fields[2].parse()
            .map_err(|e| format!("bad time '{}': {}", fields[2], e))?;
        let long = match fields[3] {
            "0" => false,
            "1" => true,
            x => return Err(format!("bad flag '{}'", x)),
        };
        Ok(Self { op, page_index, elapsed_ns, long })
    }
}

/// Writes [TraceRecord]s to some sink, emitting the header once.
pub struct TraceWriter {
    sink: Box<dyn Write>,
    header_done: bool,
}
impl TraceWriter {
    pub fn new(sink: Box<dyn Write>) -> Self {
        Self { sink, header_done: false }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Write a record. Failures are logged and otherwise ignored; losing a
    /// trace line doesn't affect the measurement.
    pub fn record(&mut self, rec: &TraceRecord) {
        let res = if self.header_done {
            writeln!(self.sink, "{}", rec)
        } else {
            self.header_done = true;
            writeln!(self.sink, "{}\n{}", TraceRecord::HEADER, rec)
        };
        if let Err(e) = res {
            warn!("Couldn't write trace record: {}", e);
        }
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.sink.flush() {
            warn!("Couldn't flush trace: {}", e);
        }
    }
}
