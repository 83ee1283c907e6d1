use crate::{ByteOrder, Record};

// Sample layout, fixed for every process mapping the region:
// offset 0 -> integer (i32), offset 4 -> fp (f32)
const INTEGER_AT: usize = 0;
const FP_AT: usize = 4;
const WORDS_AT: usize = 8;

/// The reference record: one integer and one float, back to back.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    pub integer: i32,
    pub fp: f32,
}

impl Sample {
    pub fn new(integer: i32, fp: f32) -> Self {
        Self { integer, fp }
    }
}

impl Record for Sample {
    const SIZE: usize = 8;

    #[inline]
    fn encode(&self, order: ByteOrder, out: &mut [u8]) {
        order.put_i32(out, INTEGER_AT, self.integer);
        order.put_f32(out, FP_AT, self.fp);
    }

    #[inline]
    fn decode(bytes: &[u8], order: ByteOrder) -> Self {
        Self {
            integer: order.get_i32(bytes, INTEGER_AT),
            fp: order.get_f32(bytes, FP_AT),
        }
    }
}

/// A `Sample` followed by `N` payload words.
///
/// Larger records make torn reads far more likely under contention, which is
/// what the stress tests and the writer binary use it for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame<const N: usize> {
    pub head: Sample,
    pub words: [i64; N],
}

impl<const N: usize> Frame<N> {
    /// Frame whose every field is derived from `n`, so a reader can tell
    /// whether all of it came from the same write.
    pub fn stamped(n: i64) -> Self {
        Self {
            head: Sample::new(n as i32, n as f32),
            words: [n; N],
        }
    }

    /// True when every payload word agrees with the head integer.
    pub fn is_uniform(&self) -> bool {
        let n = self.head.integer as i64;
        self.words.iter().all(|&w| w as i32 as i64 == n)
    }
}

impl<const N: usize> Default for Frame<N> {
    fn default() -> Self {
        Self {
            head: Sample::default(),
            words: [0; N],
        }
    }
}

impl<const N: usize> Record for Frame<N> {
    const SIZE: usize = WORDS_AT + 8 * N;

    fn encode(&self, order: ByteOrder, out: &mut [u8]) {
        self.head.encode(order, out);
        for (i, w) in self.words.iter().enumerate() {
            order.put_i64(out, WORDS_AT + 8 * i, *w);
        }
    }

    fn decode(bytes: &[u8], order: ByteOrder) -> Self {
        let mut words = [0i64; N];
        for (i, w) in words.iter_mut().enumerate() {
            *w = order.get_i64(bytes, WORDS_AT + 8 * i);
        }
        Self {
            head: Sample::decode(bytes, order),
            words,
        }
    }
}
