//! Cached, seqlock-validated access to a record in shared memory.
//!
//! # Read protocol
//!
//! 1. Poll the sequence until it is even; remember it as `start`
//! 2. Ask the backend for the active slot offset (fresh every attempt)
//! 3. Copy the record out and decode it in the region's byte order
//! 4. Re-read the sequence; if it moved away from `start`, discard and go to 1
//! 5. Cache the record together with `start`
//!
//! A cached record stays valid for as long as the live sequence still equals
//! the cached one, so repeated reads between writes cost one atomic load.
//!
//! # Liveness
//!
//! A writer that never pauses can keep a reader retrying forever. That is the
//! seqlock deal: the writer always wins. Attach a [`CancelToken`] to bound the
//! wait from the outside.

use crate::backend::ShmBackend;
use crate::error::ShmError;
use crate::wait::{CancelToken, WaitStrategy};
use std::sync::atomic::{Ordering, fence};
use tandem_record::{Record, Sample};

/// Contention counters for one [`SharedRecord`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Completed, validated refreshes.
    pub refreshes: u64,
    /// Attempts thrown away because the sequence moved during the copy.
    pub retries: u64,
    /// Polls that found a write in progress.
    pub busy_polls: u64,
}

#[derive(Clone, Copy, Debug)]
struct CachedView<R> {
    record: R,
    sequence: u64,
}

/// One reader's (and optionally writer's) handle on a shared record.
///
/// Methods take `&mut self`: the cache is per handle. Give every thread or
/// process its own `SharedRecord` over its own backend handle.
pub struct SharedRecord<B: ShmBackend, R: Record> {
    backend: B,
    cached: Option<CachedView<R>>,
    wait: WaitStrategy,
    cancel: Option<CancelToken>,
    stats: ReadStats,
    scratch: Vec<u8>,
}

impl<B: ShmBackend, R: Record> SharedRecord<B, R> {
    /// Wraps an already mapped backend. Nothing is read until first access.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cached: None,
            wait: WaitStrategy::default(),
            cancel: None,
            stats: ReadStats::default(),
            scratch: Vec::with_capacity(R::SIZE),
        }
    }

    pub fn with_wait_strategy(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Lets `token` abort any wait this handle gets stuck in.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Sequence the cached record was validated at, if any.
    pub fn cached_sequence(&self) -> Option<u64> {
        self.cached.map(|c| c.sequence)
    }

    /// Latest record, refreshing only if the writer moved on since the last
    /// validated read.
    pub fn read(&mut self) -> Result<R, ShmError> {
        let live = self.backend.sequence()?;
        if let Some(c) = self.cached {
            if c.sequence == live {
                return Ok(c.record);
            }
        }
        self.refresh()
    }

    /// Reads one field (or anything derived from the record).
    #[inline]
    pub fn field<T>(&mut self, f: impl FnOnce(&R) -> T) -> Result<T, ShmError> {
        self.read().map(|r| f(&r))
    }

    /// Publishes `record` through the backend, then refreshes so this handle
    /// observes its own write without another round trip.
    pub fn write(&mut self, record: R) -> Result<(), ShmError> {
        self.backend.write_record(&record)?;
        self.refresh()?;
        Ok(())
    }

    /// Runs the full read protocol, waiting out writers as long as it takes
    /// (or until cancelled).
    pub fn refresh(&mut self) -> Result<R, ShmError> {
        loop {
            let start = self.wait_even()?;
            match self.attempt(start)? {
                Some(record) => return Ok(self.store(record, start)),
                None => {
                    self.stats.retries += 1;
                    tracing::trace!(start, "sequence moved during read, retrying");
                    if let Some(token) = &self.cancel {
                        token.check()?;
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// One pass of the read protocol without waiting.
    ///
    /// Returns [`ShmError::Contended`] if a write was in progress or raced the
    /// copy; the cache is left untouched in that case.
    pub fn try_refresh(&mut self) -> Result<R, ShmError> {
        let start = self.backend.sequence()?;
        if start & 1 == 1 {
            self.stats.busy_polls += 1;
            return Err(ShmError::Contended { observed: start });
        }
        match self.attempt(start)? {
            Some(record) => Ok(self.store(record, start)),
            None => {
                self.stats.retries += 1;
                Err(ShmError::Contended { observed: start })
            }
        }
    }

    /// Polls until the sequence is even and returns it.
    fn wait_even(&mut self) -> Result<u64, ShmError> {
        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    tracing::warn!("shared record read cancelled while waiting for a writer");
                    return Err(ShmError::Cancelled);
                }
            }
            let seq = self.backend.sequence()?;
            if seq & 1 == 0 {
                return Ok(seq);
            }
            self.stats.busy_polls += 1;
            self.wait.pause();
        }
    }

    /// Copies the record at the current active slot and re-checks `start`.
    /// `None` means the copy may be torn.
    fn attempt(&mut self, start: u64) -> Result<Option<R>, ShmError> {
        let view = self.backend.acquire_view()?;
        let offset = self.backend.active_slot_offset()?;
        let record = view.read_record::<R>(offset, &mut self.scratch)?;
        // The copy above must not sink below the re-check.
        fence(Ordering::Acquire);
        let end = self.backend.sequence()?;
        Ok((end == start).then_some(record))
    }

    fn store(&mut self, record: R, sequence: u64) -> R {
        self.cached = Some(CachedView { record, sequence });
        self.stats.refreshes += 1;
        record
    }
}

impl<B: ShmBackend> SharedRecord<B, Sample> {
    pub fn integer(&mut self) -> Result<i32, ShmError> {
        self.field(|s| s.integer)
    }

    pub fn fp(&mut self) -> Result<f32, ShmError> {
        self.field(|s| s.fp)
    }

    /// Convenience for `write(Sample::new(integer, fp))`.
    pub fn set(&mut self, fp: f32, integer: i32) -> Result<(), ShmError> {
        self.write(Sample::new(integer, fp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeapBackend, ShmView, WriteMode};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tandem_record::ByteOrder;

    const SLOT_A: usize = 0;
    const SLOT_B: usize = 16;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Sequence(u64),
        Offset(usize),
    }

    /// Test double: sequence values come from a script, two fixed slots hold
    /// different records, and every call is logged.
    struct ScriptedBackend {
        image: Vec<u8>,
        order: ByteOrder,
        script: RefCell<VecDeque<u64>>,
        settled: Cell<u64>,
        offset: Cell<usize>,
        calls: RefCell<Vec<Call>>,
    }

    impl ScriptedBackend {
        fn new(a: Sample, b: Sample, order: ByteOrder) -> Self {
            let mut image = vec![0u8; 32];
            a.encode(order, &mut image[SLOT_A..]);
            b.encode(order, &mut image[SLOT_B..]);
            Self {
                image,
                order,
                script: RefCell::new(VecDeque::new()),
                settled: Cell::new(0),
                offset: Cell::new(SLOT_A),
                calls: RefCell::new(Vec::new()),
            }
        }

        /// Queue `values`; once drained the sequence stays at `settled`.
        fn script(&self, values: &[u64], settled: u64) {
            self.script.borrow_mut().extend(values.iter().copied());
            self.settled.set(settled);
        }

        fn offsets_read(&self) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|c| matches!(c, Call::Offset(_)))
                .count()
        }
    }

    impl ShmBackend for ScriptedBackend {
        fn acquire_view(&self) -> Result<ShmView<'_>, ShmError> {
            Ok(ShmView::from_slice(&self.image, self.order))
        }

        fn write_record<T: Record>(&mut self, _record: &T) -> Result<(), ShmError> {
            Err(ShmError::ReadOnly)
        }

        fn active_slot_offset(&self) -> Result<usize, ShmError> {
            let off = self.offset.get();
            self.calls.borrow_mut().push(Call::Offset(off));
            Ok(off)
        }

        fn sequence(&self) -> Result<u64, ShmError> {
            let seq = self.script.borrow_mut().pop_front().unwrap_or(self.settled.get());
            self.calls.borrow_mut().push(Call::Sequence(seq));
            Ok(seq)
        }
    }

    fn spin<B: ShmBackend>(backend: B) -> SharedRecord<B, Sample> {
        SharedRecord::new(backend).with_wait_strategy(WaitStrategy::Spin)
    }

    #[test]
    fn no_field_read_while_sequence_is_odd() {
        let backend = ScriptedBackend::new(Sample::new(1, 1.0), Sample::new(2, 2.0), ByteOrder::native());
        backend.script(&[3, 3, 3, 3], 4);
        let mut shared = spin(backend);

        assert_eq!(shared.refresh().unwrap(), Sample::new(1, 1.0));
        assert_eq!(shared.stats().busy_polls, 4);
        assert_eq!(shared.cached_sequence(), Some(4));

        // Every offset lookup must come right after an even sequence poll.
        let calls = shared.backend().calls.borrow().clone();
        let first_offset = calls.iter().position(|c| matches!(c, Call::Offset(_))).unwrap();
        assert_eq!(first_offset, 4 + 1);
        assert_eq!(calls[first_offset - 1], Call::Sequence(4));
        assert!(calls[..first_offset - 1].iter().all(|c| *c == Call::Sequence(3)));
    }

    #[test]
    fn sequence_change_costs_exactly_one_retry() {
        let backend = ScriptedBackend::new(Sample::new(1, 1.0), Sample::new(2, 2.0), ByteOrder::native());
        // start=4, recheck=6 (torn), start=6, recheck=6 (ok)
        backend.script(&[4, 6], 6);
        let mut shared = spin(backend);

        shared.refresh().unwrap();
        assert_eq!(shared.stats().retries, 1);
        assert_eq!(shared.stats().refreshes, 1);
        assert_eq!(shared.backend().offsets_read(), 2);
        assert_eq!(shared.cached_sequence(), Some(6));
    }

    #[test]
    fn recheck_uses_the_pre_read_value() {
        let backend = ScriptedBackend::new(Sample::new(1, 1.0), Sample::new(2, 2.0), ByteOrder::native());
        // Both polls even, but different: still a torn read.
        backend.script(&[8, 10, 10, 10], 10);
        let mut shared = spin(backend);
        shared.refresh().unwrap();
        assert_eq!(shared.stats().retries, 1);
        assert_eq!(shared.cached_sequence(), Some(10));
    }

    #[test]
    fn new_active_offset_is_used_on_next_read() {
        let backend = ScriptedBackend::new(Sample::new(1, 1.0), Sample::new(2, 2.0), ByteOrder::native());
        backend.script(&[], 2);
        let mut shared = spin(backend);
        assert_eq!(shared.read().unwrap(), Sample::new(1, 1.0));

        shared.backend().offset.set(SLOT_B);
        shared.backend().settled.set(4);
        assert_eq!(shared.read().unwrap(), Sample::new(2, 2.0));
        assert_eq!(shared.integer().unwrap(), 2);
    }

    #[test]
    fn cached_reads_do_not_touch_the_record() {
        let backend = ScriptedBackend::new(Sample::new(5, 0.5), Sample::default(), ByteOrder::native());
        backend.script(&[], 2);
        let mut shared = spin(backend);

        let first = shared.read().unwrap();
        for _ in 0..10 {
            assert_eq!(shared.read().unwrap(), first);
            assert_eq!(shared.fp().unwrap(), 0.5);
        }
        assert_eq!(shared.stats().refreshes, 1);
        assert_eq!(shared.cached_sequence(), Some(2));
        assert_eq!(shared.backend().offsets_read(), 1);
    }

    #[test]
    fn foreign_order_backend_decodes_exactly() {
        let foreign = ByteOrder::native().opposite();
        let mut shared = spin(HeapBackend::with_order(Sample::default(), foreign));
        shared.write(Sample::new(-123, 3.25)).unwrap();
        assert_eq!(shared.integer().unwrap(), -123);
        assert_eq!(shared.fp().unwrap(), 3.25);

        // Bytes in the region really are in the writer's order.
        let backend = shared.backend();
        let mut raw = [0u8; 4];
        let view = backend.acquire_view().unwrap();
        view.read_into(backend.active_slot_offset().unwrap(), &mut raw).unwrap();
        assert_eq!(foreign.get_i32(&raw, 0), -123);
        assert_ne!(i32::from_ne_bytes(raw), -123);
    }

    #[test]
    fn write_is_visible_to_the_writer_immediately() {
        for mode in [WriteMode::InPlace, WriteMode::DoubleBuffered] {
            let mut shared = spin(HeapBackend::new(Sample::new(42, 23.42)).with_mode(mode));
            assert_eq!(shared.read().unwrap(), Sample::new(42, 23.42));
            shared.set(1.5, 7).unwrap();
            assert_eq!(shared.cached_sequence(), Some(2));
            assert_eq!(shared.read().unwrap(), Sample::new(7, 1.5));
            assert_eq!(shared.stats().refreshes, 2);
        }
    }

    #[test]
    fn other_handle_sees_write_on_next_read() {
        let backend = HeapBackend::new(Sample::default());
        let mut writer = spin(backend.clone());
        let mut reader = spin(backend);

        assert_eq!(reader.read().unwrap(), Sample::default());
        writer.write(Sample::new(3, 3.0)).unwrap();
        assert_eq!(reader.read().unwrap(), Sample::new(3, 3.0));
        assert_eq!(reader.cached_sequence(), writer.cached_sequence());
    }

    #[test]
    fn cancel_interrupts_a_stuck_wait() {
        let backend = ScriptedBackend::new(Sample::default(), Sample::default(), ByteOrder::native());
        // Writer never finishes.
        backend.script(&[], 1);
        let token = CancelToken::new();
        let mut shared = SharedRecord::<_, Sample>::new(backend)
            .with_wait_strategy(WaitStrategy::Sleep(Duration::from_millis(1)))
            .with_cancel_token(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            token.cancel();
        });
        assert!(matches!(shared.refresh(), Err(ShmError::Cancelled)));
        assert!(shared.cached_sequence().is_none());
        assert!(shared.stats().busy_polls > 0);
        canceller.join().unwrap();
    }

    #[test]
    fn try_refresh_reports_contention_without_waiting() {
        let backend = ScriptedBackend::new(Sample::new(9, 9.0), Sample::default(), ByteOrder::native());
        backend.script(&[5, 6, 8], 8);
        let mut shared = spin(backend);

        let busy = shared.try_refresh().unwrap_err();
        assert!(busy.is_transient());
        assert!(matches!(busy, ShmError::Contended { observed: 5 }));

        let torn = shared.try_refresh().unwrap_err();
        assert!(matches!(torn, ShmError::Contended { observed: 6 }));
        assert!(shared.cached_sequence().is_none());

        assert_eq!(shared.try_refresh().unwrap(), Sample::new(9, 9.0));
        assert_eq!(shared.cached_sequence(), Some(8));
    }

    /// Cancels `token` as soon as a read attempt looks up the active slot,
    /// i.e. after the even-sequence wait has already passed.
    struct CancelsMidRead {
        inner: ScriptedBackend,
        token: CancelToken,
    }

    impl ShmBackend for CancelsMidRead {
        fn acquire_view(&self) -> Result<ShmView<'_>, ShmError> {
            self.inner.acquire_view()
        }
        fn write_record<T: Record>(&mut self, record: &T) -> Result<(), ShmError> {
            self.inner.write_record(record)
        }
        fn active_slot_offset(&self) -> Result<usize, ShmError> {
            self.token.cancel();
            self.inner.active_slot_offset()
        }
        fn sequence(&self) -> Result<u64, ShmError> {
            self.inner.sequence()
        }
    }

    #[test]
    fn cancel_stops_retrying_after_a_torn_read() {
        let inner = ScriptedBackend::new(Sample::new(1, 1.0), Sample::default(), ByteOrder::native());
        // start=0, recheck=2: the copy is discarded, and the writer keeps going.
        inner.script(&[0, 2], 4);
        let token = CancelToken::new();
        let backend = CancelsMidRead {
            inner,
            token: token.clone(),
        };
        let mut shared = spin(backend).with_cancel_token(token);

        assert!(matches!(shared.refresh(), Err(ShmError::Cancelled)));
        assert_eq!(shared.stats().retries, 1);
        assert_eq!(shared.stats().busy_polls, 0);
        assert_eq!(shared.stats().refreshes, 0);
        assert!(shared.cached_sequence().is_none());
        // No second attempt after the cancel.
        assert_eq!(shared.backend().inner.offsets_read(), 1);
    }

    /// Backend whose mapping went away upstream.
    struct Unmapped;

    impl ShmBackend for Unmapped {
        fn acquire_view(&self) -> Result<ShmView<'_>, ShmError> {
            Err(ShmError::Unavailable("no mapping".into()))
        }
        fn write_record<T: Record>(&mut self, _record: &T) -> Result<(), ShmError> {
            Err(ShmError::Unavailable("no mapping".into()))
        }
        fn active_slot_offset(&self) -> Result<usize, ShmError> {
            Err(ShmError::Unavailable("no mapping".into()))
        }
        fn sequence(&self) -> Result<u64, ShmError> {
            Err(ShmError::Unavailable("no mapping".into()))
        }
    }

    #[test]
    fn unavailable_backend_surfaces_immediately() {
        let mut shared = spin(Unmapped);
        let err = shared.read().unwrap_err();
        assert!(matches!(err, ShmError::Unavailable(_)));
        assert!(!err.is_transient());
        assert!(matches!(shared.try_refresh(), Err(ShmError::Unavailable(_))));
        assert!(matches!(shared.set(1.0, 1), Err(ShmError::Unavailable(_))));
        assert_eq!(shared.stats(), ReadStats::default());
    }

    #[test]
    fn backend_failures_are_not_retried() {
        let backend = ScriptedBackend::new(Sample::default(), Sample::default(), ByteOrder::native());
        backend.offset.set(1024);
        let mut shared = spin(backend);
        assert!(matches!(shared.read(), Err(ShmError::OutOfBounds { .. })));
        assert_eq!(shared.stats().retries, 0);

        assert!(matches!(shared.write(Sample::default()), Err(ShmError::ReadOnly)));
    }
}
