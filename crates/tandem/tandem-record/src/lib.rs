#![forbid(unsafe_code)]

pub mod byte_order;
pub mod sample;

pub use byte_order::ByteOrder;
pub use sample::{Frame, Sample};

/// A fixed-size, fixed-layout value that can live in a shared slot.
///
/// Records are stored field by field in the writer's byte order, never as a
/// raw `repr(C)` image, so a reader on a different endianness can still
/// decode them. `encode` and `decode` must agree on the byte layout and both
/// touch exactly `SIZE` bytes.
pub trait Record: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Writes `self` into `out[..SIZE]` using `order`.
    fn encode(&self, order: ByteOrder, out: &mut [u8]);

    /// Reads a value back from `bytes[..SIZE]` stored in `order`.
    fn decode(bytes: &[u8], order: ByteOrder) -> Self;
}
