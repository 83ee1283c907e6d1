//! Binary layout of a shared record region.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         RegionHeader (64B)                           │
//! │  magic │ version │ record_size │ slot_stride │ slot_count │          │
//! │  sequence (atomic) │ active_slot (atomic) │ pad                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  slot[0]: record bytes, padded to slot_stride                        │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  slot[1]: record bytes, padded to slot_stride                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every header word is stored in the writer's byte order. The magic doubles
//! as a byte-order mark: a reader that only recognizes it after swapping knows
//! the region is foreign and normalizes everything it reads.

use crate::error::ShmError;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering, fence};
use tandem_record::ByteOrder;

/// ASCII "TANDEMRG" read as a big-endian word. Not a byte palindrome, so it
/// also reveals the byte order of the region.
pub const REGION_MAGIC: u64 = 0x5441_4E44_454D_5247;

/// Bump on incompatible layout changes.
pub const REGION_VERSION: u64 = 1;

/// Number of record copies. Two is enough for double buffering.
pub const SLOT_COUNT: u64 = 2;

/// Header and slots start on cache line boundaries.
pub const CACHE_LINE: usize = 64;

#[repr(C)]
pub struct RegionHeader {
    pub magic: u64,
    pub version: u64,
    /// Encoded record size in bytes. Readers reject a mismatching type.
    pub record_size: u64,
    /// Distance between slot starts (record size rounded to a cache line).
    pub slot_stride: u64,
    pub slot_count: u64,
    /// Odd while a write is in progress, even when quiescent.
    pub sequence: AtomicU64,
    /// Index of the authoritative slot, 0 or 1.
    pub active_slot: AtomicU64,
}

/// Bytes reserved for the header before the first slot.
pub const HEADER_SPAN: usize = round_up(size_of::<RegionHeader>(), CACHE_LINE);

pub const fn round_up(n: usize, to: usize) -> usize {
    n.div_ceil(to) * to
}

/// Distance between the starts of two consecutive slots.
pub const fn slot_stride(record_size: usize) -> usize {
    // A zero-sized record still gets a line so slots stay distinct.
    if record_size == 0 {
        CACHE_LINE
    } else {
        round_up(record_size, CACHE_LINE)
    }
}

/// Byte offset of slot `idx` from the start of the region.
#[inline(always)]
pub const fn slot_offset(idx: u64, stride: usize) -> usize {
    HEADER_SPAN + idx as usize * stride
}

/// Total bytes needed for a region holding records of `record_size` bytes.
pub const fn bytes_for_region(record_size: usize) -> usize {
    HEADER_SPAN + SLOT_COUNT as usize * slot_stride(record_size)
}

impl RegionHeader {
    /// Works out the writer's byte order from the stored magic word.
    pub fn detect_order(&self) -> Result<ByteOrder, ShmError> {
        let native = ByteOrder::native();
        if self.magic == REGION_MAGIC {
            Ok(native)
        } else if self.magic == REGION_MAGIC.swap_bytes() {
            Ok(native.opposite())
        } else {
            Err(ShmError::Layout("bad magic"))
        }
    }

    /// Validates an existing header against the expected record size and the
    /// length of the mapping it lives in. Returns the region's byte order.
    pub fn validate(&self, record_size: usize, mapped_len: usize) -> Result<ByteOrder, ShmError> {
        let order = self.detect_order()?;
        // Pairs with the Release fence before the creator stores the magic.
        fence(Ordering::Acquire);
        if order.normalize_u64(self.version) != REGION_VERSION {
            return Err(ShmError::Layout("wrong version"));
        }
        if order.normalize_u64(self.slot_count) != SLOT_COUNT {
            return Err(ShmError::Layout("unexpected slot count"));
        }
        if order.normalize_u64(self.record_size) as usize != record_size {
            return Err(ShmError::Layout("record size mismatch"));
        }
        if order.normalize_u64(self.slot_stride) as usize != slot_stride(record_size) {
            return Err(ShmError::Layout("slot stride mismatch"));
        }
        if mapped_len < bytes_for_region(record_size) {
            return Err(ShmError::Layout("region shorter than its header claims"));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fits_one_cache_line() {
        assert!(size_of::<RegionHeader>() <= CACHE_LINE);
        assert_eq!(HEADER_SPAN, CACHE_LINE);
    }

    #[test]
    fn slots_are_line_aligned() {
        assert_eq!(slot_stride(8), 64);
        assert_eq!(slot_stride(64), 64);
        assert_eq!(slot_stride(65), 128);
        assert_eq!(slot_offset(0, 64), 64);
        assert_eq!(slot_offset(1, 128), 192);
        assert_eq!(bytes_for_region(8), 64 + 2 * 64);
    }

    #[test]
    fn magic_is_not_a_palindrome() {
        assert_ne!(REGION_MAGIC, REGION_MAGIC.swap_bytes());
    }
}
