use super::{ShmBackend, ShmView, WriteMode};
use crate::error::ShmError;
use crate::layout::bytes_for_region;
use crate::region::Region;
use std::path::Path;
use tandem_mmap::{MmapFile, MmapFileMut};
use tandem_record::{ByteOrder, Record};

/// File-backed transport: any process that maps the same file shares the
/// record.
///
/// The creating side lays the region out; other processes attach with
/// [`MmapBackend::open_rw`] (to write as well) or [`MmapBackend::open_ro`].
pub struct MmapBackend {
    region: Region,
    mode: WriteMode,
    scratch: Vec<u8>,
    path: String,
    /// Keeps the mapping `region` points into alive.
    map: Mapping,
}

enum Mapping {
    ReadWrite(MmapFileMut),
    ReadOnly(MmapFile),
}

fn map_err(path: &Path) -> impl FnOnce(std::io::Error) -> ShmError + '_ {
    move |source| ShmError::Map {
        path: path.display().to_string(),
        source,
    }
}

impl MmapBackend {
    /// Creates (or truncates) the file at `path` and lays out a fresh region
    /// in native byte order with `seed` in both slots.
    pub fn create<R: Record, P: AsRef<Path>>(path: P, seed: &R) -> Result<Self, ShmError> {
        Self::create_with_order(path, seed, ByteOrder::native())
    }

    /// Like [`MmapBackend::create`], but stores everything in `order`.
    pub fn create_with_order<R: Record, P: AsRef<Path>>(
        path: P,
        seed: &R,
        order: ByteOrder,
    ) -> Result<Self, ShmError> {
        let path = path.as_ref();
        let bytes = bytes_for_region(R::SIZE);
        let mut mm = MmapFileMut::create_rw(path, bytes as u64).map_err(map_err(path))?;

        let mut encoded = vec![0u8; R::SIZE];
        seed.encode(order, &mut encoded);
        // SAFETY: we just created and sized this mapping; nobody has attached yet
        let region = unsafe { Region::init(mm.as_mut_ptr(), mm.len(), order, &encoded) };

        tracing::debug!(path = %path.display(), bytes, record_size = R::SIZE, ?order, "shared region created");
        Ok(Self {
            region,
            mode: WriteMode::default(),
            scratch: encoded,
            path: path.display().to_string(),
            map: Mapping::ReadWrite(mm),
        })
    }

    /// Attaches read-write to a region created by another process.
    pub fn open_rw<R: Record, P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let path = path.as_ref();
        let mut mm = MmapFileMut::open_rw(path).map_err(map_err(path))?;
        // SAFETY: the mapping stays alive inside `self`; attach() validates it
        let region = unsafe { Region::attach(mm.as_mut_ptr(), mm.len(), R::SIZE)? };
        tracing::debug!(path = %path.display(), order = ?region.order(), "shared region opened read-write");
        Ok(Self {
            region,
            mode: WriteMode::default(),
            scratch: Vec::with_capacity(R::SIZE),
            path: path.display().to_string(),
            map: Mapping::ReadWrite(mm),
        })
    }

    /// Attaches read-only. `write_record` on the result fails with
    /// [`ShmError::ReadOnly`].
    pub fn open_ro<R: Record, P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let path = path.as_ref();
        let mm = MmapFile::open_ro(path).map_err(map_err(path))?;
        // SAFETY: as above; the write paths are never reached for ReadOnly
        let region = unsafe { Region::attach(mm.as_ptr() as *mut u8, mm.len(), R::SIZE)? };
        tracing::debug!(path = %path.display(), order = ?region.order(), "shared region opened read-only");
        Ok(Self {
            region,
            mode: WriteMode::default(),
            scratch: Vec::new(),
            path: path.display().to_string(),
            map: Mapping::ReadOnly(mm),
        })
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.region.order()
    }

    /// Size of the mapping in bytes.
    pub fn mapped_len(&self) -> usize {
        match &self.map {
            Mapping::ReadWrite(mm) => mm.len(),
            Mapping::ReadOnly(mm) => mm.len(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.map, Mapping::ReadWrite(_))
    }

    /// Locks the mapping into RAM so the writer never waits on a page-in.
    pub fn lock_memory(&self) -> Result<(), ShmError> {
        match &self.map {
            Mapping::ReadWrite(mm) => mm.lock().map_err(|source| ShmError::Map {
                path: self.path.clone(),
                source,
            }),
            Mapping::ReadOnly(_) => Err(ShmError::ReadOnly),
        }
    }
}

impl ShmBackend for MmapBackend {
    fn acquire_view(&self) -> Result<ShmView<'_>, ShmError> {
        Ok(self.region.view())
    }

    fn write_record<R: Record>(&mut self, record: &R) -> Result<(), ShmError> {
        if !self.is_writable() {
            return Err(ShmError::ReadOnly);
        }
        if R::SIZE != self.region.record_size() {
            return Err(ShmError::Layout("record size mismatch"));
        }
        self.scratch.resize(R::SIZE, 0);
        record.encode(self.region.order(), &mut self.scratch);
        match self.mode {
            WriteMode::InPlace => self.region.write_in_place(&self.scratch)?,
            WriteMode::DoubleBuffered => self.region.commit(&self.scratch)?,
        };
        Ok(())
    }

    fn active_slot_offset(&self) -> Result<usize, ShmError> {
        Ok(self.region.active_slot_offset())
    }

    fn sequence(&self) -> Result<u64, ShmError> {
        Ok(self.region.sequence())
    }
}
