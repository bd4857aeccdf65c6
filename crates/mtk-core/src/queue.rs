//! Growable SPSC/MPSC queue built on top of [`crate::ring::Ring`].
//!
//! `Ring` is fixed-capacity and strictly single-producer; this module adds
//! the two things the spec's queue wants on top of it (§4.2): bounded
//! growth, and an optional multi-producer mode where writers serialize
//! through a short critical section while the consumer stays lock-free.
//!
//! # Growth
//!
//! Growth takes the write side of an `RwLock<Arc<Ring<T>>>`: steady-state
//! push/pop take the read lock (uncontended, cheap) and only a growth event
//! takes the write lock, allocates a strictly larger `Ring`, migrates the
//! live items across with `consume_batch_owned` + `push`, and swaps in the
//! new `Arc`. This trades the teacher's in-place free-chain relinking for a
//! fresh allocation per growth step, sidestepping the unsafe pointer
//! relinking that approach needs in safe Rust; growth is bounded by
//! `GrowthConfig::max_chunks` so it cannot run away.
//!
//! # Multi-producer mode
//!
//! When `multi_producer` is set, `push`/`push_wait` take `write_lock` before
//! touching the ring so concurrent writers don't race each other's
//! reserve/commit pair. The consumer never takes this lock.

use crate::invariants::debug_assert_pool_conserved;
use crate::{Config, GrowthConfig, KernelError, Metrics, MetricsSnapshot, Result, Ring, Signal};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::error;

/// A bounded-growth queue with optional multi-producer support and
/// blocking wait variants of push/pop.
pub struct Queue<T> {
    ring: RwLock<Arc<Ring<T>>>,
    config: Config,
    multi_producer: bool,
    write_lock: Mutex<()>,
    not_empty: Signal,
    not_full: Signal,
    chunks_grown: AtomicUsize,
    metrics: Metrics,
}

impl<T> Queue<T> {
    /// Creates a new queue. `multi_producer` enables the writer critical
    /// section; leave it `false` for the common dedicated-producer-thread
    /// case to avoid paying for a lock nobody contends.
    pub fn new(config: Config, multi_producer: bool) -> Self {
        Self {
            ring: RwLock::new(Arc::new(Ring::new(config))),
            config,
            multi_producer,
            write_lock: Mutex::new(()),
            not_empty: Signal::new(),
            not_full: Signal::new(),
            chunks_grown: AtomicUsize::new(0),
            metrics: Metrics::new(),
        }
    }

    /// Returns the current allocated capacity (reflects any growth so far).
    pub fn capacity(&self) -> usize {
        self.ring.read().unwrap().capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read().unwrap().is_empty()
    }

    /// Pushes an item, growing the backing ring first if it's currently
    /// full and growth is configured. Fails with
    /// [`KernelError::BufferOverflow`] if the ring is full, closed, and
    /// growth is disabled or exhausted.
    pub fn push(&self, item: T) -> Result<()> {
        self.push_recoverable(item).map_err(|(e, _)| e)
    }

    /// Like [`Queue::push`], but on failure hands the item back instead of
    /// dropping it — used by callers (e.g. the receive delay buffer) that
    /// need to reclaim a payload's backing buffer on overflow rather than
    /// leak it.
    pub fn push_recoverable(&self, item: T) -> std::result::Result<(), (KernelError, T)> {
        // Serializes concurrent writers; a no-op uncontended lock when the
        // queue has a single dedicated producer thread.
        let _guard = self.multi_producer.then(|| self.write_lock.lock().unwrap());

        let needs_growth = {
            let ring = self.ring.read().unwrap();
            !ring.is_closed() && ring.is_full()
        };

        let ring = if needs_growth {
            match self.grow_locked() {
                Ok(ring) => ring,
                Err(e) => return Err((e, item)),
            }
        } else {
            self.ring.read().unwrap().clone()
        };

        match ring.reserve(1) {
            Some(mut reservation) => {
                reservation.as_mut_slice()[0].write(item);
                reservation.commit();
                self.not_empty.set();
                Ok(())
            }
            None => {
                error!(capacity = ring.capacity(), "queue full, dropping push");
                Err((KernelError::BufferOverflow, item))
            }
        }
    }

    /// Pushes an item, blocking until space is available or `timeout`
    /// elapses. `timeout = None` blocks indefinitely.
    pub fn push_wait(&self, item: T, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut item = item;
        loop {
            match self.push_recoverable(item) {
                Ok(()) => return Ok(()),
                Err((KernelError::BufferOverflow, returned)) => item = returned,
                Err((e, _)) => return Err(e),
            }

            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(KernelError::Throttling);
                    }
                    Some(d - now)
                }
                None => None,
            };
            if !self.not_full.wait(remaining) {
                return Err(KernelError::Throttling);
            }
            self.not_full.clear();
        }
    }

    fn grow_locked(&self) -> Result<Arc<Ring<T>>> {
        let growth = self.config.growth.ok_or(KernelError::BufferOverflow)?;
        let mut ring_guard = self.ring.write().unwrap();

        // Another writer may have already grown (or freed space) while we
        // waited for the write lock.
        if !ring_guard.is_full() {
            return Ok(ring_guard.clone());
        }

        let chunks = self.chunks_grown.load(Ordering::Acquire);
        if chunks >= growth.max_chunks {
            return Err(KernelError::BufferOverflow);
        }

        let old = ring_guard.clone();
        let new_capacity_bits = next_capacity_bits(old.capacity(), growth);
        let new_config = Config {
            capacity_bits: new_capacity_bits,
            enable_metrics: self.config.enable_metrics,
            growth: self.config.growth,
        };
        let new_ring = Ring::new(new_config);

        let old_len = old.len();
        let mut migrated = 0usize;
        old.consume_batch_owned(|value| {
            let pushed = new_ring.push(value);
            debug_assert!(pushed, "freshly grown ring must fit the old ring's contents");
            migrated += 1;
        });
        debug_assert_pool_conserved!(0, migrated, 0, old_len);

        *ring_guard = Arc::new(new_ring);
        self.chunks_grown.fetch_add(1, Ordering::AcqRel);
        Ok(ring_guard.clone())
    }

    /// Pops an item, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let ring = self.ring.read().unwrap();
        let item = ring.pop();
        if item.is_some() {
            self.not_full.set();
        }
        item
    }

    /// Pops an item, blocking until one is available or `timeout` elapses.
    pub fn pop_wait(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if self.ring.read().unwrap().is_closed() {
                return None;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    Some(d - now)
                }
                None => None,
            };
            if !self.not_empty.wait(remaining) {
                return None;
            }
            self.not_empty.clear();
        }
    }

    /// Drops every currently-queued item without processing it, returning
    /// the number discarded.
    pub fn flush(&self) -> usize {
        let ring = self.ring.read().unwrap();
        let mut count = 0;
        ring.consume_batch_owned(|_| count += 1);
        if count > 0 {
            self.not_full.set();
            if self.config.enable_metrics {
                self.metrics.add_drops(count as u64);
            }
        }
        count
    }

    /// Closes the underlying ring; subsequent pushes fail.
    pub fn destroy(&self) {
        self.ring.read().unwrap().close();
        self.not_empty.set();
        self.not_full.set();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ring.read().unwrap().metrics()
    }
}

fn next_capacity_bits(current_capacity: usize, growth: GrowthConfig) -> u8 {
    let target = current_capacity + growth.chunk_size;
    let mut bits = 1u8;
    while (1usize << bits) < target {
        bits += 1;
    }
    bits
}
