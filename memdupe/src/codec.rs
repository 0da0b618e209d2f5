//! Conversion between byte strings and one-bit-per-page patterns.
//!
//! Each byte is expanded most-significant-bit first, so the message `"Hi"`
//! (`0x48 0x49`) becomes `01001000 01001001`. Bit `i` of a pattern is
//! carried by the `i`-th page visited by a write pass.

use bitvec::prelude::*;
use itertools::Itertools;

use crate::error::CodecError;

/// An ordered sequence of bits, one per page.
pub type BitPattern = BitVec<u8, Msb0>;

/// A borrowed [BitPattern].
pub type BitPatternSlice = BitSlice<u8, Msb0>;

/// Expand a message into a pattern of `message.len() * 8` bits.
pub fn encode(message: &[u8]) -> BitPattern {
    // Msb0 ordering over u8 storage is exactly MSB-first per byte.
    BitPattern::from_slice(message)
}

/// Collapse a pattern back into bytes.
///
/// Fails with [CodecError::Truncated] unless the length of the pattern is a
/// multiple of 8.
pub fn decode(pattern: &BitPatternSlice) -> Result<Vec<u8>, CodecError> {
    if pattern.len() % 8 != 0 {
        return Err(CodecError::Truncated { bits: pattern.len() });
    }
    let msg = pattern.chunks(8).map(|byte| {
        byte.iter().by_vals().fold(0u8, |val, bit| val * 2 + bit as u8)
    }).collect();
    Ok(msg)
}

/// Clip a pattern to the number of pages available to carry it.
///
/// Bits beyond `pages` are dropped. When that happens, the returned
/// [CodecError::Overflow] describes what was lost; callers are expected to
/// report it and carry on with the truncated pattern.
pub fn fit(mut pattern: BitPattern, pages: usize)
    -> (BitPattern, Option<CodecError>)
{
    if pattern.len() <= pages {
        return (pattern, None);
    }
    let err = CodecError::Overflow { bits: pattern.len(), pages };
    pattern.truncate(pages);
    (pattern, Some(err))
}

/// Render a pattern as groups of eight `0`/`1` digits.
pub fn render(pattern: &BitPatternSlice) -> String {
    pattern.chunks(8).map(|byte| {
        byte.iter().by_vals().map(|b| if b { '1' } else { '0' })
            .collect::<String>()
    }).join(" ")
}

/// Render a decoded message for humans, escaping anything unprintable.
pub fn printable(msg: &[u8]) -> String {
    msg.iter().map(|b| std::ascii::escape_default(*b).to_string()).collect()
}
