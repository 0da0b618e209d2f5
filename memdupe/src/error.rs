//! Error types.

use std::path::PathBuf;

/// Errors produced while encoding or decoding a [`BitPattern`].
///
/// [`BitPattern`]: crate::codec::BitPattern
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The pattern doesn't end on a byte boundary.
    #[error("truncated bit pattern: {bits} bits is not a multiple of 8")]
    Truncated { bits: usize },

    /// The encoded message doesn't fit in the available pages.
    #[error("message needs {bits} pages but only {pages} are available")]
    Overflow { bits: usize, pages: usize },

    /// The receiver asked for more bytes than the buffer can carry.
    #[error("asked to decode {want} bits but only {have} pages were sampled")]
    Short { want: usize, have: usize },
}

/// Errors produced while reading a [`ClockSource`].
///
/// [`ClockSource`]: crate::clock::ClockSource
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("clock read failed: {0}")]
    Read(String),

    #[error("clock source unavailable: {0}")]
    Unavailable(#[source] std::io::Error),

    #[error("scripted clock ran out of readings")]
    Exhausted,
}

/// Errors produced by a probe session.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("couldn't load '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't allocate {size} bytes of page-aligned memory: {source}")]
    Allocation {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("platform refused to mark {size} bytes as mergeable: {reason}")]
    NotMergeable { size: usize, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The first pass took no time at all, so the aggregate ratio is
    /// undefined.
    #[error("first pass total is zero; ratio is undefined")]
    DivisionByZero,

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("page timer is {found}, expected {expected}")]
    State {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
