use super::{ShmBackend, ShmView, WriteMode};
use crate::error::ShmError;
use crate::layout::bytes_for_region;
use crate::region::Region;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tandem_record::{ByteOrder, Record};

/// In-process transport: the region lives on the heap and every clone of the
/// handle sees the same memory.
///
/// Handy for threads sharing a record and for tests. Give each thread its own
/// clone; keep at most one of them writing in [`WriteMode::DoubleBuffered`].
#[derive(Clone)]
pub struct HeapBackend {
    shared: Arc<HeapRegion>,
    mode: WriteMode,
    scratch: Vec<u8>,
}

struct HeapRegion {
    region: Region,
    // Backing storage; words keep the header atomics aligned.
    _words: Box<[AtomicU64]>,
}

impl HeapBackend {
    /// New region in native byte order, both slots holding `seed`.
    pub fn new<R: Record>(seed: R) -> Self {
        Self::with_order(seed, ByteOrder::native())
    }

    /// New region written in `order`, as a writer of that endianness would.
    pub fn with_order<R: Record>(seed: R, order: ByteOrder) -> Self {
        let bytes = bytes_for_region(R::SIZE);
        let words: Box<[AtomicU64]> = (0..bytes / 8).map(|_| AtomicU64::new(0)).collect();
        let mut encoded = vec![0u8; R::SIZE];
        seed.encode(order, &mut encoded);

        // SAFETY: freshly allocated, 8-aligned, `bytes` long, owned by HeapRegion
        let region = unsafe { Region::init(words.as_ptr() as *mut u8, bytes, order, &encoded) };
        tracing::debug!(bytes, record_size = R::SIZE, ?order, "heap region created");

        Self {
            shared: Arc::new(HeapRegion {
                region,
                _words: words,
            }),
            mode: WriteMode::default(),
            scratch: encoded,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.shared.region.order()
    }
}

impl ShmBackend for HeapBackend {
    fn acquire_view(&self) -> Result<ShmView<'_>, ShmError> {
        Ok(self.shared.region.view())
    }

    fn write_record<R: Record>(&mut self, record: &R) -> Result<(), ShmError> {
        let region = &self.shared.region;
        self.scratch.resize(R::SIZE, 0);
        record.encode(region.order(), &mut self.scratch);
        match self.mode {
            WriteMode::InPlace => region.write_in_place(&self.scratch)?,
            WriteMode::DoubleBuffered => region.commit(&self.scratch)?,
        };
        Ok(())
    }

    fn active_slot_offset(&self) -> Result<usize, ShmError> {
        Ok(self.shared.region.active_slot_offset())
    }

    fn sequence(&self) -> Result<u64, ShmError> {
        Ok(self.shared.region.sequence())
    }
}
