//! Page-aligned buffers eligible for merging.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{ debug, info, warn };
use memmap2::{ MmapMut, MmapOptions };
use nix::sys::mman::{ madvise, MmapAdvise };
use rand::Rng;

use crate::error::{ ProbeError, Result };
use crate::util::pagemap::PageMap;

/// Default page size.
pub const PAGE_SIZE: usize = 4096;

/// What to do about marking a buffer as mergeable (`MADV_MERGEABLE`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum MergeHint {
    /// The hint must be accepted; a refusal is a configuration error.
    Required,
    /// Try to set the hint, but carry on (with a warning) if refused.
    BestEffort,
    /// Don't set the hint.
    Off,
}

/// Counts of pages resolved through `/proc/self/pagemap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Residency {
    pub pages: usize,
    pub present: usize,
    /// Present pages mapped only by this process. A page that has been
    /// merged with another process is not exclusive.
    pub exclusive: usize,
}

/// A contiguous, page-aligned region of anonymous memory.
///
/// The mapping is `byte_length + 1` bytes rounded up to a whole number of
/// pages (the extra byte is a NUL terminator), and `page_count` is the
/// number of pages spanned by the content itself.
///
/// Pages are addressed by index. Writes always land on the *last* byte of
/// a page.
pub struct PageBuffer {
    map: Option<MmapMut>,
    map_len: usize,
    byte_length: usize,
    page_size: usize,
    page_count: usize,
    mergeable: bool,
}

impl PageBuffer {
    /// Allocate a zero-filled buffer with room for `byte_length` bytes.
    fn alloc(byte_length: usize, page_size: usize) -> Result<Self> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(ProbeError::Config(
                format!("page size {} is not a power of two", page_size)
            ));
        }
        let map_len = (byte_length + 1 + page_size - 1) & !(page_size - 1);
        let map = MmapOptions::new().len(map_len).map_anon()
            .map_err(|source| ProbeError::Allocation { size: map_len, source })?;
        let page_count = (byte_length + page_size - 1) / page_size;
        Ok(Self {
            map: Some(map),
            map_len,
            byte_length,
            page_size,
            page_count,
            mergeable: false,
        })
    }

    /// Read the entire contents of the file at `path` into a fresh buffer.
    pub fn load(path: impl AsRef<Path>, page_size: usize, hint: MergeHint)
        -> Result<Self>
    {
        let path = path.as_ref();
        let io_err = |source| ProbeError::Io {
            path: path.to_path_buf(), source
        };

        let mut f = File::open(path).map_err(io_err)?;
        let len = f.metadata().map_err(io_err)?.len() as usize;

        let mut res = Self::alloc(len, page_size)?;
        let bytes = res.bytes_mut();
        f.read_exact(&mut bytes[..len]).map_err(io_err)?;
        bytes[len] = 0;

        res.apply_hint(hint)?;
        info!("Read '{}': {} bytes, {} pages", path.display(), len,
            res.page_count);
        Ok(res)
    }

    /// Create a buffer of `len` bytes with every byte set to `byte`.
    pub fn filled(len: usize, byte: u8, page_size: usize, hint: MergeHint)
        -> Result<Self>
    {
        let mut res = Self::alloc(len, page_size)?;
        res.bytes_mut()[..len].fill(byte);
        res.apply_hint(hint)?;
        debug!("Filled {} bytes with {:#04x}, {} pages", len, byte,
            res.page_count);
        Ok(res)
    }

    /// Create a buffer of `len` random bytes. Its pages should never merge
    /// with anything.
    pub fn random(len: usize, page_size: usize, hint: MergeHint)
        -> Result<Self>
    {
        let mut res = Self::alloc(len, page_size)?;
        rand::thread_rng().fill(&mut res.bytes_mut()[..len]);
        res.apply_hint(hint)?;
        Ok(res)
    }

    fn apply_hint(&mut self, hint: MergeHint) -> Result<()> {
        if hint == MergeHint::Off {
            return Ok(());
        }
        let len = self.map_len;
        let ptr = self.bytes_mut().as_mut_ptr();
        let res = unsafe {
            madvise(ptr as *mut std::ffi::c_void, len, MmapAdvise::MADV_MERGEABLE)
        };
        match res {
            Ok(()) => {
                self.mergeable = true;
                Ok(())
            },
            Err(errno) if hint == MergeHint::BestEffort => {
                warn!("MADV_MERGEABLE refused ({}), continuing without it",
                    errno.desc());
                Ok(())
            },
            Err(errno) => Err(ProbeError::NotMergeable {
                size: len,
                reason: errno.desc().to_string(),
            }),
        }
    }

    fn map(&self) -> &MmapMut {
        self.map.as_ref().expect("page buffer used after release")
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.map.as_mut().expect("page buffer used after release")
    }

    /// Offset of the last byte in page `page_index`.
    fn mark_offset(&self, page_index: usize) -> usize {
        assert!(page_index < self.page_count,
            "page {} out of range ({} pages)", page_index, self.page_count);
        (page_index + 1) * self.page_size - 1
    }

    /// Write `value` to the last byte of page `page_index`.
    ///
    /// Panics if `page_index` is out of range or the buffer was released.
    #[inline(always)]
    pub fn write_byte(&mut self, page_index: usize, value: u8) {
        let off = self.mark_offset(page_index);
        let ptr = self.bytes_mut().as_mut_ptr();
        unsafe { std::ptr::write_volatile(ptr.add(off), value) };
    }

    /// Read the last byte of page `page_index`.
    pub fn read_byte(&self, page_index: usize) -> u8 {
        let off = self.mark_offset(page_index);
        let ptr = self.map().as_ptr();
        unsafe { std::ptr::read_volatile(ptr.add(off)) }
    }

    /// Read the last byte of every page, in the order pages are visited by
    /// a write pass.
    pub fn read_marks(&self) -> Vec<u8> {
        self.visit_order().map(|idx| self.read_byte(idx)).collect()
    }

    /// Page indexes in the order a write pass visits them (last page first).
    pub fn visit_order(&self) -> impl Iterator<Item=usize> {
        (0..self.page_count).rev()
    }

    /// The content, excluding the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map()[..self.byte_length]
    }

    /// Resolve the pages of this buffer through `/proc/self/pagemap`.
    pub fn residency(&self) -> std::result::Result<Residency, &'static str> {
        let base = self.map().as_ptr() as usize;
        let entries = PageMap::entries(base, self.page_count, self.page_size)?;
        Ok(Residency {
            pages: self.page_count,
            present: entries.iter().filter(|e| e.present()).count(),
            exclusive: entries.iter()
                .filter(|e| e.present() && e.exclusive()).count(),
        })
    }

    /// Unmap the buffer. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.map.take() {
            Some(map) => {
                drop(map);
                debug!("Released {} bytes", self.map_len);
                true
            },
            None => false,
        }
    }

    pub fn is_released(&self) -> bool { self.map.is_none() }
    pub fn is_mergeable(&self) -> bool { self.mergeable }
    pub fn byte_length(&self) -> usize { self.byte_length }
    pub fn page_count(&self) -> usize { self.page_count }
    pub fn page_size(&self) -> usize { self.page_size }
    pub fn map_len(&self) -> usize { self.map_len }
}

impl std::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuffer")
         .field("byte_length", &self.byte_length)
         .field("page_count", &self.page_count)
         .field("page_size", &self.page_size)
         .field("mergeable", &self.mergeable)
         .field("released", &self.is_released())
         .finish()
    }
}
