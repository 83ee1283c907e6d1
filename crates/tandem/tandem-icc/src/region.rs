//! Raw seqlock primitives over a region laid out as described in [`layout`].
//!
//! # Writer protocol
//!
//! **In place** (real-time writer):
//! 1. CAS the sequence from even `s` to `s + 1` (write in progress)
//! 2. Overwrite the active slot
//! 3. Store `s + 2` with Release (write complete)
//!
//! **Double buffered** (transactional writer):
//! 1. Wait for an even start sequence `s`
//! 2. Fill the inactive slot; readers never look there
//! 3. CAS `s -> s + 1`; if another write got in first, the prepared copy may be
//!    stale, so start over
//! 4. Flip `active_slot`, then store `s + 2`
//!
//! Both paths keep the `even -> odd -> even + 2` progression readers rely on.
//!
//! [`layout`]: crate::layout

use crate::backend::ShmView;
use crate::error::ShmError;
use crate::layout::{
    HEADER_SPAN, REGION_MAGIC, REGION_VERSION, RegionHeader, SLOT_COUNT, bytes_for_region,
    slot_offset, slot_stride,
};
use std::ptr;
use std::sync::atomic::{Ordering, fence};
use tandem_record::ByteOrder;

pub(crate) struct Region {
    /// Start of the mapped header. Owned by whoever created the `Region`.
    base: *mut u8,
    len: usize,
    order: ByteOrder,
    record_size: usize,
    stride: usize,
}

// SAFETY: all shared mutation goes through the header atomics or is fenced by
// the sequence protocol; the owner keeps the memory alive.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Lays out a fresh region and writes `seed` into both slots.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `len` bytes, 8-byte
    /// aligned, not yet visible to any reader, and must outlive the `Region`.
    /// `len` must be at least `bytes_for_region(seed.len())`.
    pub(crate) unsafe fn init(base: *mut u8, len: usize, order: ByteOrder, seed: &[u8]) -> Self {
        debug_assert!(len >= bytes_for_region(seed.len()));
        let record_size = seed.len();
        let stride = slot_stride(record_size);
        let word = |v: u64| order.normalize_u64(v);

        // SAFETY: caller guarantees exclusive access to a large enough region.
        unsafe {
            let h = base as *mut RegionHeader;
            ptr::write(
                h,
                RegionHeader {
                    magic: 0,
                    version: word(REGION_VERSION),
                    record_size: word(record_size as u64),
                    slot_stride: word(stride as u64),
                    slot_count: word(SLOT_COUNT),
                    sequence: std::sync::atomic::AtomicU64::new(word(0)),
                    active_slot: std::sync::atomic::AtomicU64::new(word(0)),
                },
            );
            for idx in 0..SLOT_COUNT {
                let slot = base.add(slot_offset(idx, stride));
                ptr::write_bytes(slot, 0, stride);
                ptr::copy_nonoverlapping(seed.as_ptr(), slot, record_size);
            }
            // Another process may be polling the file; the magic goes last.
            fence(Ordering::Release);
            ptr::write_volatile(ptr::addr_of_mut!((*h).magic), word(REGION_MAGIC));
        }

        Self {
            base,
            len,
            order,
            record_size,
            stride,
        }
    }

    /// Attaches to a region some writer already laid out.
    ///
    /// # Safety
    /// `base` must be valid for reads of `len` bytes, 8-byte aligned, and
    /// outlive the `Region`. Write paths additionally need it writable.
    pub(crate) unsafe fn attach(base: *mut u8, len: usize, record_size: usize) -> Result<Self, ShmError> {
        if len < HEADER_SPAN {
            return Err(ShmError::Layout("region shorter than a header"));
        }
        // SAFETY: at least a header's worth of mapped bytes, checked above.
        let header = unsafe { &*(base as *const RegionHeader) };
        let order = header.validate(record_size, len)?;
        Ok(Self {
            base,
            len,
            order,
            record_size,
            stride: slot_stride(record_size),
        })
    }

    #[inline(always)]
    fn header(&self) -> &RegionHeader {
        // SAFETY: base points to a header that init() wrote or attach() validated
        unsafe { &*(self.base as *const RegionHeader) }
    }

    #[inline(always)]
    pub(crate) fn order(&self) -> ByteOrder {
        self.order
    }

    #[inline(always)]
    pub(crate) fn record_size(&self) -> usize {
        self.record_size
    }

    pub(crate) fn view(&self) -> ShmView<'_> {
        // SAFETY: the region is mapped for `len` bytes for as long as `self` lives
        unsafe { ShmView::from_raw_parts(self.base, self.len, self.order) }
    }

    #[inline(always)]
    pub(crate) fn sequence(&self) -> u64 {
        self.order.normalize_u64(self.header().sequence.load(Ordering::Acquire))
    }

    #[inline(always)]
    fn active_slot(&self) -> u64 {
        // Masked so a scribbled header can never index past the last slot.
        self.order.normalize_u64(self.header().active_slot.load(Ordering::Acquire)) & 1
    }

    #[inline(always)]
    pub(crate) fn active_slot_offset(&self) -> usize {
        slot_offset(self.active_slot(), self.stride)
    }

    fn check_record(&self, bytes: &[u8]) -> Result<(), ShmError> {
        if bytes.len() != self.record_size {
            return Err(ShmError::Layout("record size mismatch"));
        }
        Ok(())
    }

    /// Moves the sequence from some even `s` to `s + 1` and returns `s`.
    /// Spins while another write holds the region.
    fn begin_write(&self) -> u64 {
        let seq = &self.header().sequence;
        loop {
            let raw = seq.load(Ordering::Relaxed);
            let s = self.order.normalize_u64(raw);
            if s & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let odd = self.order.normalize_u64(s.wrapping_add(1));
            if seq
                .compare_exchange_weak(raw, odd, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // Keep the slot writes below from floating above the odd store.
                fence(Ordering::Release);
                return s;
            }
        }
    }

    #[inline(always)]
    fn end_write(&self, start: u64) {
        let even = self.order.normalize_u64(start.wrapping_add(2));
        self.header().sequence.store(even, Ordering::Release);
    }

    /// # Safety
    /// Caller must hold the slot exclusively (odd sequence, or slot inactive
    /// under a single writer). `bytes.len()` must equal `record_size`.
    #[inline(always)]
    unsafe fn fill_slot(&self, idx: u64, bytes: &[u8]) {
        // SAFETY: slot_offset(idx) + record_size <= len for idx < SLOT_COUNT
        unsafe {
            let slot = self.base.add(slot_offset(idx, self.stride));
            ptr::copy_nonoverlapping(bytes.as_ptr(), slot, bytes.len());
        }
    }

    /// Overwrites the active slot under an odd sequence.
    pub(crate) fn write_in_place(&self, bytes: &[u8]) -> Result<u64, ShmError> {
        self.check_record(bytes)?;
        let start = self.begin_write();
        let idx = self.active_slot();
        // SAFETY: odd sequence; readers discard anything they copy meanwhile
        unsafe { self.fill_slot(idx, bytes) };
        self.end_write(start);
        Ok(start.wrapping_add(2))
    }

    /// Prepares the inactive slot, then publishes it as the active one.
    ///
    /// Only one double-buffered writer may run per region at a time. In-place
    /// writers may run alongside it: they never touch the inactive slot.
    pub(crate) fn commit(&self, bytes: &[u8]) -> Result<u64, ShmError> {
        self.check_record(bytes)?;
        let seq = &self.header().sequence;
        loop {
            let raw = seq.load(Ordering::Acquire);
            let start = self.order.normalize_u64(raw);
            if start & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let inactive = 1 - self.active_slot();
            // Keep the slot writes below from floating above the previous
            // round's sequence bumps.
            fence(Ordering::Release);
            // SAFETY: a reader still copying this slot from an older round
            // fails its sequence re-check once the CAS below lands.
            unsafe { self.fill_slot(inactive, bytes) };

            let odd = self.order.normalize_u64(start.wrapping_add(1));
            // Release publishes the prepared slot together with the odd value.
            if seq
                .compare_exchange(raw, odd, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                tracing::trace!(start, "commit raced another write, preparing again");
                continue;
            }

            self.header()
                .active_slot
                .store(self.order.normalize_u64(inactive), Ordering::Release);
            self.end_write(start);
            return Ok(start.wrapping_add(2));
        }
    }
}
