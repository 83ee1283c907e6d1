//! The four memory primitives the seqlock reader builds on, and the
//! transports that provide them.

mod heap;
mod mmap;

pub use heap::HeapBackend;
pub use mmap::MmapBackend;

use crate::error::ShmError;
use std::marker::PhantomData;
use std::ptr;
use tandem_record::{ByteOrder, Record};

/// A transport holding one shared record region.
///
/// Implementations own the memory; [`SharedRecord`](crate::SharedRecord)
/// only borrows it for the length of a read attempt. Every method except
/// `write_record` must be callable while another process or thread writes.
pub trait ShmBackend {
    /// Read-only view over the whole region, in the writer's byte order.
    fn acquire_view(&self) -> Result<ShmView<'_>, ShmError>;

    /// Publishes `record`: sequence goes odd, the bytes land in the (possibly
    /// newly selected) active slot, sequence goes even again.
    fn write_record<R: Record>(&mut self, record: &R) -> Result<(), ShmError>;

    /// Byte offset of the authoritative slot within the view. May change on
    /// every write, so callers must not cache it across read attempts.
    fn active_slot_offset(&self) -> Result<usize, ShmError>;

    /// Current sequence counter; odd while a write is in progress.
    fn sequence(&self) -> Result<u64, ShmError>;
}

/// How a backend turns `write_record` into memory traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the active slot under an odd sequence. Never waits on
    /// anything but another writer; meant for the real-time side.
    InPlace,
    /// Prepare the inactive slot, then flip it active.
    #[default]
    DoubleBuffered,
}

/// Borrowed window onto a shared region.
///
/// The bytes behind a view may change at any moment, so it never hands out
/// references into the region; [`ShmView::read_into`] copies instead and the
/// caller validates the copy against the sequence counter.
#[derive(Clone, Copy, Debug)]
pub struct ShmView<'a> {
    base: *const u8,
    len: usize,
    order: ByteOrder,
    _region: PhantomData<&'a [u8]>,
}

impl<'a> ShmView<'a> {
    /// # Safety
    /// `base` must be valid for reads of `len` bytes for the whole of `'a`.
    pub unsafe fn from_raw_parts(base: *const u8, len: usize, order: ByteOrder) -> Self {
        Self {
            base,
            len,
            order,
            _region: PhantomData,
        }
    }

    /// View over memory nobody else mutates, e.g. a snapshot or a test image.
    pub fn from_slice(bytes: &'a [u8], order: ByteOrder) -> Self {
        // SAFETY: the slice is valid for its length for 'a
        unsafe { Self::from_raw_parts(bytes.as_ptr(), bytes.len(), order) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte order the region was written in.
    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Copies `out.len()` bytes starting at `offset`.
    ///
    /// The copy may be torn if a writer is active; only a matching sequence
    /// re-check makes it trustworthy.
    #[inline]
    pub fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<(), ShmError> {
        let in_bounds = offset.checked_add(out.len()).is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(ShmError::OutOfBounds {
                offset,
                len: out.len(),
                size: self.len,
            });
        }
        // SAFETY: bounds checked above; `out` is a distinct local buffer
        unsafe { ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), out.len()) };
        Ok(())
    }

    /// Copies and decodes a record stored at `offset`.
    pub fn read_record<R: Record>(&self, offset: usize, scratch: &mut Vec<u8>) -> Result<R, ShmError> {
        scratch.resize(R::SIZE, 0);
        self.read_into(offset, scratch)?;
        Ok(R::decode(scratch, self.order))
    }
}
