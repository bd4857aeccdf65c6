//! Fixed-capacity object pool with bounded growth.
//!
//! Grounded on the free-list-plus-RAII-guard pattern from the
//! `buffer_pool.rs` reference example: a `Mutex`-guarded free list of slab
//! indices, an `init_fn` used to populate newly-grown slots, and a
//! [`PoolHandle`] guard that returns its slot to the pool on `Drop`.
//!
//! Spec §9 calls for typed slab-index ownership in place of pointer
//! arithmetic or header tricks; [`PoolHandle`] carries the slab index
//! rather than a raw pointer, so `put`/`Drop` can never target the wrong
//! slot or be fooled by use-after-free.

use crate::invariants::{debug_assert_pool_conserved, debug_assert_pool_empty_on_destroy};
use crate::{Config, GrowthConfig, KernelError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;

struct PoolInner<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    in_use: usize,
    growth: Option<GrowthConfig>,
    chunks_grown: usize,
}

/// A bounded object pool. `init_fn` is called once per slot, including
/// slots added by growth, to produce the initial value stored there.
pub struct Pool<T> {
    inner: Mutex<PoolInner<T>>,
    init_fn: Box<dyn Fn() -> T + Send + Sync>,
    thread_safe: bool,
    total_capacity: AtomicUsize,
}

/// A handle to a slot leased from a [`Pool`]. Returns the slot to the pool
/// when dropped unless [`PoolHandle::into_inner`] is called first.
pub struct PoolHandle<T> {
    pool: Arc<Pool<T>>,
    index: usize,
    value: Option<T>,
}

impl<T> Pool<T> {
    /// Creates a pool with `initial_capacity` slots, each populated by
    /// `init_fn`. `thread_safe` controls whether `get`/`put` take the
    /// internal lock; set to `false` only when the pool is confined to a
    /// single thread for its entire lifetime.
    pub fn new(
        initial_capacity: usize,
        growth: Option<GrowthConfig>,
        thread_safe: bool,
        init_fn: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        let mut slots = Vec::with_capacity(initial_capacity);
        let mut free = Vec::with_capacity(initial_capacity);
        for i in 0..initial_capacity {
            slots.push(Some(init_fn()));
            free.push(i);
        }
        // Pop order doesn't matter for correctness but reversing gives
        // lowest-index-first allocation, which is easier to reason about
        // in tests and debug logs.
        free.reverse();

        Self {
            inner: Mutex::new(PoolInner {
                slots,
                free,
                in_use: 0,
                growth,
                chunks_grown: 0,
            }),
            init_fn: Box::new(init_fn),
            thread_safe,
            total_capacity: AtomicUsize::new(initial_capacity),
        }
    }

    /// Convenience constructor reading capacity/growth from a [`Config`].
    pub fn with_config(
        config: Config,
        thread_safe: bool,
        init_fn: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self::new(config.capacity(), config.growth, thread_safe, init_fn)
    }

    /// Total number of slots currently allocated (initial + any growth).
    pub fn capacity(&self) -> usize {
        self.total_capacity.load(Ordering::Relaxed)
    }

    /// Number of slots currently leased out.
    pub fn in_use(&self) -> usize {
        self.inner.lock().unwrap().in_use
    }

    /// Leases a slot, growing the pool first if configured and exhausted.
    /// Returns [`KernelError::NotEnoughMemory`] if none are available.
    pub fn get(self: &Arc<Self>) -> Result<PoolHandle<T>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.free.is_empty() {
            if let Err(err) = self.grow_locked(&mut inner) {
                error!(
                    capacity = self.total_capacity.load(Ordering::Relaxed),
                    "pool exhausted and unable to grow further"
                );
                return Err(err);
            }
        }

        let index = inner.free.pop().ok_or(KernelError::NotEnoughMemory)?;
        let value = inner.slots[index].take().expect("free slot always holds a value");
        inner.in_use += 1;

        debug_assert_pool_conserved!(
            inner.free.len(),
            inner.in_use,
            0,
            self.total_capacity.load(Ordering::Relaxed)
        );

        Ok(PoolHandle {
            pool: Arc::clone(self),
            index,
            value: Some(value),
        })
    }

    fn grow_locked(&self, inner: &mut PoolInner<T>) -> Result<()> {
        let growth = inner.growth.ok_or(KernelError::NotEnoughMemory)?;
        if inner.chunks_grown >= growth.max_chunks {
            return Err(KernelError::NotEnoughMemory);
        }

        let start = inner.slots.len();
        for i in 0..growth.chunk_size {
            inner.slots.push(Some((self.init_fn)()));
            inner.free.push(start + i);
        }
        inner.chunks_grown += 1;
        self.total_capacity
            .fetch_add(growth.chunk_size, Ordering::Relaxed);
        Ok(())
    }

    /// Returns a slot to the pool. Used by [`PoolHandle::drop`]; exposed
    /// directly for callers that manage slots without a handle (e.g. the
    /// timer module, which keys slots by a generation-checked index).
    fn put(&self, index: usize, value: T) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.slots[index].is_none(), "double free of pool slot {index}");
        inner.slots[index] = Some(value);
        inner.free.push(index);
        inner.in_use -= 1;
    }

    /// Calls `f` with a reference to every slot currently in use. Useful
    /// for diagnostics; not safe to call from within `get`/`put`.
    pub fn for_each_in_use(&self, mut f: impl FnMut(&T)) {
        let inner = self.inner.lock().unwrap();
        for slot in &inner.slots {
            if let Some(value) = slot {
                f(value);
            }
        }
    }

    /// Tears down the pool. Panics in debug builds if any slot is still
    /// leased (spec's INV-POOL-02: a pool must not be destroyed while
    /// handles are outstanding).
    pub fn destroy(&self) {
        let inner = self.inner.lock().unwrap();
        debug_assert_pool_empty_on_destroy!(inner.in_use);
    }

    /// Whether this pool enforces internal locking on `get`/`put`.
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

impl<T> PoolHandle<T> {
    /// Access the leased value.
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("value present until drop")
    }

    /// Mutable access to the leased value.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("value present until drop")
    }

    /// The slab index backing this handle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Consumes the handle without returning its slot to the pool, handing
    /// back the raw value. Used when ownership needs to escape the pool
    /// (e.g. a buffer being handed to an SG list entry).
    pub fn into_inner(mut self) -> T {
        self.value.take().expect("value present until drop")
    }
}

impl<T> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put(self.index, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_roundtrip() {
        let pool = Arc::new(Pool::new(4, None, true, || 0u64));
        let h1 = pool.get().unwrap();
        let h2 = pool.get().unwrap();
        assert_eq!(pool.in_use(), 2);
        drop(h1);
        drop(h2);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn exhausted_pool_without_growth_errors() {
        let pool = Arc::new(Pool::new(2, None, true, || 0u64));
        let _a = pool.get().unwrap();
        let _b = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(KernelError::NotEnoughMemory)));
    }

    #[test]
    fn grows_when_configured() {
        let growth = GrowthConfig {
            chunk_size: 2,
            max_chunks: 1,
        };
        let pool = Arc::new(Pool::new(1, Some(growth), true, || 0u64));
        let _a = pool.get().unwrap();
        assert_eq!(pool.capacity(), 1);
        let _b = pool.get().unwrap();
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn into_inner_does_not_return_slot() {
        let pool = Arc::new(Pool::new(1, None, true, || 42u64));
        let handle = pool.get().unwrap();
        let value = handle.into_inner();
        assert_eq!(value, 42);
        assert_eq!(pool.in_use(), 1, "slot stays leased until explicitly put back");
    }

    #[test]
    fn destroy_is_noop_when_empty() {
        let pool = Arc::new(Pool::new(2, None, true, || 0u64));
        pool.destroy();
    }
}
