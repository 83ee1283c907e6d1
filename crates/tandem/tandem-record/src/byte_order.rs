//! Byte order of a shared region and the field accessors that honour it.
//!
//! A region is always written in the writer's native order. A reader whose
//! native order differs has to swap every multi-byte field it pulls out,
//! otherwise integers and floats decode as garbage.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the running process.
    #[inline(always)]
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    #[inline(always)]
    pub const fn opposite(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    #[inline(always)]
    pub fn is_native(self) -> bool {
        self == Self::native()
    }

    /// Converts a word between its in-memory representation and its value.
    ///
    /// Swapping is an involution, so the same call serves both directions:
    /// value -> stored word on the writer side, stored word -> value on the
    /// reader side.
    #[inline(always)]
    pub fn normalize_u64(self, word: u64) -> u64 {
        if self.is_native() { word } else { word.swap_bytes() }
    }

    #[inline]
    pub fn get_u32(self, bytes: &[u8], at: usize) -> u32 {
        let raw = take::<4>(bytes, at);
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn get_u64(self, bytes: &[u8], at: usize) -> u64 {
        let raw = take::<8>(bytes, at);
        match self {
            ByteOrder::Little => u64::from_le_bytes(raw),
            ByteOrder::Big => u64::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn get_i32(self, bytes: &[u8], at: usize) -> i32 {
        self.get_u32(bytes, at) as i32
    }

    #[inline]
    pub fn get_i64(self, bytes: &[u8], at: usize) -> i64 {
        self.get_u64(bytes, at) as i64
    }

    #[inline]
    pub fn get_f32(self, bytes: &[u8], at: usize) -> f32 {
        f32::from_bits(self.get_u32(bytes, at))
    }

    #[inline]
    pub fn put_u32(self, out: &mut [u8], at: usize, v: u32) {
        let raw = match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        out[at..at + 4].copy_from_slice(&raw);
    }

    #[inline]
    pub fn put_u64(self, out: &mut [u8], at: usize, v: u64) {
        let raw = match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        out[at..at + 8].copy_from_slice(&raw);
    }

    #[inline]
    pub fn put_i32(self, out: &mut [u8], at: usize, v: i32) {
        self.put_u32(out, at, v as u32);
    }

    #[inline]
    pub fn put_i64(self, out: &mut [u8], at: usize, v: i64) {
        self.put_u64(out, at, v as u64);
    }

    #[inline]
    pub fn put_f32(self, out: &mut [u8], at: usize, v: f32) {
        self.put_u32(out, at, v.to_bits());
    }
}

#[inline(always)]
fn take<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[at..at + N]);
    raw
}
