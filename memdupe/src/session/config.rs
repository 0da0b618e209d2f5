//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::buffer::{ MergeHint, PAGE_SIZE };
use crate::error::{ ProbeError, Result };

/// The part a session plays in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Measure whether deduplication happens at all.
    #[value(alias = "0")]
    Tester,
    /// Encode a message by dirtying a subset of pages.
    #[value(alias = "1")]
    Sender,
    /// Recover a message from per-page write latencies.
    #[value(alias = "2")]
    Receiver,
}
impl Role {
    pub fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Self::Tester),
            1 => Some(Self::Sender),
            2 => Some(Self::Receiver),
            _ => None,
        }
    }
}
impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tester => write!(f, "tester"),
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
        }
    }
}

/// Where the contents of the probed pages come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageSource {
    /// Load a file.
    File(PathBuf),
    /// `len` bytes, all set to `byte`.
    Fill { len: usize, byte: u8 },
    /// `len` random bytes, different for every buffer. These pages should
    /// never be merged, which makes them a control for the other sources.
    Random { len: usize },
}

/// Configuration consumed by [ProbeSession](crate::session::ProbeSession).
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// The role played by this session.
    pub role: Role,

    /// How long to sleep between passes (giving the scanner time to merge).
    pub dormant: Duration,

    /// Contents of the probed buffers.
    pub source: PageSource,

    /// Multiplier used by the classifier. In aggregate mode this is
    /// compared against `second / first`; in per-page mode a write is
    /// "long" when it exceeds `threshold` times the running mean.
    pub threshold: f64,

    /// Message encoded by a sender.
    pub message: Vec<u8>,

    /// Number of bytes a receiver decodes. When unset, as many whole bytes
    /// as there are pages.
    pub message_len: Option<usize>,

    /// Number of extra identical buffers loaded (and only ever released)
    /// to enlarge the population of mergeable pages.
    pub redundant_copies: usize,

    /// Whether to mark buffers as mergeable.
    pub merge_hint: MergeHint,

    /// Page size used to lay out the buffers.
    pub page_size: usize,

    /// Byte written to the last byte of each touched page.
    pub fill: u8,

    /// Optionally pin the session to a specific hardware thread.
    pub pinned_core: Option<usize>,

    /// Emit a CSV record for every instrumented page write.
    pub trace: bool,
}

impl ProbeConfig {
    pub const DEFAULT_PATH: &'static str = "/usr/bin/perl";
    pub const DEFAULT_DORMANT: Duration = Duration::from_secs(5);
    pub const DEFAULT_MESSAGE: &'static [u8] = b"Hello";
    pub const DEFAULT_REDUNDANT_COPIES: usize = 2;
    pub const DEFAULT_FILL: u8 = b'.';

    /// Aggregate threshold: the second pass must be more than twice as slow.
    pub const TESTER_THRESHOLD: f64 = 2.0;

    /// Per-page threshold. With roughly half of the pages merged, a merged
    /// page is only ever a small multiple of the running mean.
    ///
    /// Below 1.0 the first sample of a pass always counts as long, and so
    /// does every sample in a leading run of equal latencies. Leading pages
    /// the sender dirtied therefore decode as `0`: a message whose first
    /// byte has its top bit set can't be recovered intact.
    pub const CHANNEL_THRESHOLD: f64 = 0.5;

    fn base(role: Role, threshold: f64) -> Self {
        Self {
            role,
            dormant: Self::DEFAULT_DORMANT,
            source: PageSource::File(PathBuf::from(Self::DEFAULT_PATH)),
            threshold,
            message: Self::DEFAULT_MESSAGE.to_vec(),
            message_len: None,
            redundant_copies: Self::DEFAULT_REDUNDANT_COPIES,
            merge_hint: MergeHint::BestEffort,
            page_size: PAGE_SIZE,
            fill: Self::DEFAULT_FILL,
            pinned_core: None,
            trace: false,
        }
    }

    pub fn tester() -> Self {
        Self::base(Role::Tester, Self::TESTER_THRESHOLD)
    }

    pub fn sender(message: impl AsRef<[u8]>) -> Self {
        Self::base(Role::Sender, Self::CHANNEL_THRESHOLD)
            .message(message)
    }

    pub fn receiver() -> Self {
        Self::base(Role::Receiver, Self::CHANNEL_THRESHOLD)
    }

    /// Defaults for the given role.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Tester => Self::tester(),
            Role::Sender => Self::sender(Self::DEFAULT_MESSAGE),
            Role::Receiver => Self::receiver(),
        }
    }
}

impl ProbeConfig {
    pub fn dormant(mut self, x: Duration) -> Self {
        self.dormant = x;
        self
    }

    pub fn file_path(mut self, x: impl Into<PathBuf>) -> Self {
        self.source = PageSource::File(x.into());
        self
    }

    pub fn fill_source(mut self, len: usize, byte: u8) -> Self {
        self.source = PageSource::Fill { len, byte };
        self
    }

    pub fn random_source(mut self, len: usize) -> Self {
        self.source = PageSource::Random { len };
        self
    }

    pub fn threshold(mut self, x: f64) -> Self {
        self.threshold = x;
        self
    }

    pub fn message(mut self, x: impl AsRef<[u8]>) -> Self {
        self.message = x.as_ref().to_vec();
        self
    }

    pub fn message_len(mut self, x: Option<usize>) -> Self {
        self.message_len = x;
        self
    }

    pub fn redundant_copies(mut self, x: usize) -> Self {
        self.redundant_copies = x;
        self
    }

    /// Load two redundant copies, or none.
    pub fn load_redundant_copies(self, x: bool) -> Self {
        self.redundant_copies(if x { Self::DEFAULT_REDUNDANT_COPIES } else { 0 })
    }

    pub fn merge_hint(mut self, x: MergeHint) -> Self {
        self.merge_hint = x;
        self
    }

    pub fn page_size(mut self, x: usize) -> Self {
        self.page_size = x;
        self
    }

    pub fn fill(mut self, x: u8) -> Self {
        self.fill = x;
        self
    }

    pub fn pinned_core(mut self, x: Option<usize>) -> Self {
        self.pinned_core = x;
        self
    }

    pub fn trace(mut self, x: bool) -> Self {
        self.trace = x;
        self
    }
}

impl ProbeConfig {
    /// Check for values no session could run with.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(ProbeError::Config(
                format!("threshold must be positive, got {}", self.threshold)
            ));
        }
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(ProbeError::Config(
                format!("page size {} is not a power of two", self.page_size)
            ));
        }
        if let PageSource::File(path) = &self.source {
            if path.as_os_str().is_empty() {
                return Err(ProbeError::Config("empty file path".to_string()));
            }
        }
        Ok(())
    }

    /// Total number of buffers loaded by a session.
    pub fn buffer_count(&self) -> usize {
        1 + self.redundant_copies
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn defaults() {
        let cfg = ProbeConfig::tester();
        assert_eq!(cfg.role, Role::Tester);
        assert_eq!(cfg.dormant, Duration::from_secs(5));
        assert_eq!(cfg.source, PageSource::File("/usr/bin/perl".into()));
        assert_eq!(cfg.buffer_count(), 3);
        assert_eq!(cfg.threshold, 2.0);
        assert!(cfg.validate().is_ok());

        let cfg = ProbeConfig::sender("Hi");
        assert_eq!(cfg.message, b"Hi");
        assert_eq!(cfg.threshold, 0.5);

        let cfg = ProbeConfig::receiver().load_redundant_copies(false);
        assert_eq!(cfg.buffer_count(), 1);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ProbeConfig::tester().threshold(0.0).validate().is_err());
        assert!(ProbeConfig::tester().threshold(f64::NAN).validate().is_err());
        assert!(ProbeConfig::tester().page_size(1000).validate().is_err());
        assert!(ProbeConfig::tester().file_path("").validate().is_err());
    }

    #[test]
    fn role_from_numeric() {
        assert_eq!(Role::from_str("0", true), Ok(Role::Tester));
        assert_eq!(Role::from_str("1", true), Ok(Role::Sender));
        assert_eq!(Role::from_str("receiver", true), Ok(Role::Receiver));
        assert_eq!(Role::from_index(2), Some(Role::Receiver));
        assert_eq!(Role::from_index(3), None);
    }
}
