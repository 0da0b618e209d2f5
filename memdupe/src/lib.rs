//! Timing probe for memory deduplication.
//!
//! Identical pages held by different processes (or different virtual
//! machines) can be merged by the host into a single copy-on-write page.
//! Writing to a merged page is measurably slower than writing to a private
//! one. This crate measures that difference, either to detect merging at
//! all ([Role::Tester]) or to carry a message between two processes that
//! share nothing but identical file contents ([Role::Sender] and
//! [Role::Receiver]).

pub mod buffer;
pub mod classify;
pub mod clock;
pub mod codec;
pub mod error;
pub mod session;
pub mod stats;
pub mod timer;
pub mod trace;
pub mod util;

pub use crate::buffer::{ MergeHint, PageBuffer, PAGE_SIZE };
pub use crate::classify::{ AggregateVerdict, Verdict };
pub use crate::clock::*;
pub use crate::codec::{ BitPattern, BitPatternSlice };
pub use crate::error::{ ClockError, CodecError, ProbeError };
pub use crate::session::*;
pub use crate::stats::{ LatencyResults, ResultList };
pub use crate::timer::*;
pub use crate::trace::*;
pub use crate::util::*;
