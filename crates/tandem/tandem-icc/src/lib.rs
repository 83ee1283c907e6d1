//! Seqlock-guarded sharing of one small record between a real-time writer and
//! any number of readers, within a process or across processes.
//!
//! ```
//! use tandem_icc::{HeapBackend, SharedRecord};
//! use tandem_record::Sample;
//!
//! let backend = HeapBackend::new(Sample::new(42, 23.42));
//! let mut writer = SharedRecord::<_, Sample>::new(backend.clone());
//! let mut reader = SharedRecord::<_, Sample>::new(backend);
//!
//! writer.set(1.5, 7).unwrap();
//! assert_eq!(reader.integer().unwrap(), 7);
//! assert_eq!(reader.fp().unwrap(), 1.5);
//! ```

mod backend;
mod error;
mod layout;
mod region;
mod shared_record;
mod wait;

pub use backend::{HeapBackend, MmapBackend, ShmBackend, ShmView, WriteMode};
pub use error::ShmError;
pub use layout::{REGION_MAGIC, REGION_VERSION, bytes_for_region};
pub use shared_record::{ReadStats, SharedRecord};
pub use wait::{CancelToken, DEFAULT_POLL_INTERVAL, WaitStrategy};
