//! Module for interacting with `/proc/self/pagemap`.

use std::io::prelude::*;

/// An entry in '/proc/self/pagemap'.
#[derive(Clone, Copy, Debug)]
pub struct PageMapEntry(pub u64);
impl PageMapEntry {
    const NUM_BYTES: usize = 8;
    pub fn present(&self) -> bool { (self.0 & (1 << 63)) != 0 }
    pub fn swapped(&self) -> bool { (self.0 & (1 << 62)) != 0 }
    pub fn exclusive(&self) -> bool { (self.0 & (1 << 56)) != 0 }
    pub fn soft_dirty(&self) -> bool { (self.0 & (1 << 55)) != 0 }
    /// Page frame number. Reads as zero without `CAP_SYS_ADMIN`.
    pub fn pfn(&self) -> usize {
        self.0 as usize & ((1 << 55) - 1)
    }
}

/// Wrapper for interacting with '/proc/self/pagemap'.
pub struct PageMap;
impl PageMap {
    const PATH: &'static str = "/proc/self/pagemap";

    /// Read the entries for `count` consecutive pages of `page_size` bytes,
    /// starting with the page containing `vaddr`.
    pub fn entries(vaddr: usize, count: usize, page_size: usize)
        -> Result<Vec<PageMapEntry>, &'static str>
    {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut f = std::fs::File::open(Self::PATH).map_err(|_| {
            "Couldn't open /proc/self/pagemap"
        })?;

        let vfn  = vaddr / page_size;
        let foff = (vfn * PageMapEntry::NUM_BYTES) as u64;
        f.seek(std::io::SeekFrom::Start(foff))
            .map_err(|_| "Couldn't seek in /proc/self/pagemap")?;

        let mut buf = vec![0u8; count * PageMapEntry::NUM_BYTES];
        f.read_exact(&mut buf)
            .map_err(|_| "Couldn't read from /proc/self/pagemap")?;

        Ok(buf.chunks_exact(PageMapEntry::NUM_BYTES).map(|b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            PageMapEntry(u64::from_le_bytes(raw))
        }).collect())
    }
}
