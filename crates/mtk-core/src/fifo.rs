//! Bounded FIFO with an overflow-combining callback.
//!
//! Identical pop/push surface to [`crate::queue::Queue`], but both sides
//! take internal locks (reader-reader and writer-writer are each
//! serialized) and a full-callback replaces the grow path: when `push`
//! finds the FIFO full, it takes the reader lock (pinning the tail),
//! hands the callback `(&new, &mut tail, &head)`, and discards the new
//! item once the callback returns — the callback has already absorbed it
//! by folding it into the pinned tail entry (e.g. accumulating stats).
//!
//! Separate reader/writer locks mirror the ring's split producer/consumer
//! roles even though the backing store is a single `VecDeque`: a writer
//! observing overflow must pin the tail against concurrent pops while it
//! runs the callback, but a reader draining the FIFO must not be blocked
//! by a writer that isn't currently overflowing.

use std::collections::VecDeque;
use std::sync::Mutex;

/// `(new, tail, head)` — invoked with the incoming item, the most
/// recently pushed (tail) entry, and the next-to-pop (head) entry. May
/// mutate `tail` in place; the new item is always discarded afterward.
pub type OverflowCallback<T> = Box<dyn FnMut(&T, &mut T, &T) + Send>;

struct FifoState<T> {
    items: VecDeque<T>,
    capacity: usize,
}

/// A bounded FIFO distinguished from [`crate::queue::Queue`] by its
/// full-callback overflow policy instead of growth or blocking.
pub struct Fifo<T> {
    writer: Mutex<FifoState<T>>,
    reader: Mutex<()>,
    on_overflow: Mutex<Option<OverflowCallback<T>>>,
}

impl<T> Fifo<T> {
    /// Creates a FIFO bounded to `capacity` entries.
    pub fn new(capacity: usize, on_overflow: Option<OverflowCallback<T>>) -> Self {
        assert!(capacity > 0, "fifo capacity must be nonzero");
        Self {
            writer: Mutex::new(FifoState {
                items: VecDeque::with_capacity(capacity),
                capacity,
            }),
            reader: Mutex::new(()),
            on_overflow: Mutex::new(on_overflow),
        }
    }

    /// Pushes an item. If the FIFO is full and an overflow callback is
    /// registered, the callback is invoked with `(new, tail, head)` under
    /// the reader lock and the new item is then discarded. If full with no
    /// callback registered, the new item is silently discarded. Never
    /// blocks.
    pub fn push(&self, item: T) {
        {
            let mut state = self.writer.lock().unwrap();
            if state.items.len() < state.capacity {
                state.items.push_back(item);
                return;
            }
        }

        // Full: re-acquire in the same reader-before-writer order `pop`
        // uses. Taking `writer` then `reader` here (as the fast path above
        // takes only `writer`) would deadlock against a concurrent `pop`
        // holding `reader` and waiting on `writer`.
        let _reader_guard = self.reader.lock().unwrap();
        let mut state = self.writer.lock().unwrap();
        if state.items.len() < state.capacity {
            // A concurrent pop freed a slot while we were re-acquiring.
            state.items.push_back(item);
            return;
        }

        // Pin the tail against concurrent pops while the callback observes
        // (and may mutate) it.
        let mut on_overflow = self.on_overflow.lock().unwrap();
        if let Some(cb) = on_overflow.as_mut() {
            // With a single slot, head and tail name the same stored entry;
            // the callback's contract (`&mut tail`, `&head`) can't be given
            // two live references to one object without `T: Clone`, so a
            // capacity-1 FIFO with a combining callback just discards on
            // overflow instead of invoking it.
            if state.items.len() > 1 {
                let tail_idx = state.items.len() - 1;
                let head = &state.items[0] as *const T;
                let tail = &mut state.items[tail_idx] as *mut T;
                // SAFETY: index 0 and tail_idx are disjoint elements of the
                // VecDeque (len > 1 here), so these pointers don't alias.
                unsafe {
                    cb(&item, &mut *tail, &*head);
                }
            }
        }
        // The new item is absorbed by the callback (or silently dropped if
        // no callback is registered); it is never enqueued.
        drop(item);
    }

    /// Pops the oldest item, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let _reader_guard = self.reader.lock().unwrap();
        let mut state = self.writer.lock().unwrap();
        state.items.pop_front()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.writer.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.writer.lock().unwrap().capacity
    }

    /// Drops every queued item without invoking the overflow callback.
    pub fn clear(&self) {
        let mut state = self.writer.lock().unwrap();
        state.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo_order() {
        let fifo = Fifo::<u64>::new(4, None);
        for i in 0..4 {
            fifo.push(i);
        }
        for i in 0..4 {
            assert_eq!(fifo.pop(), Some(i));
        }
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn overflow_folds_new_item_into_tail() {
        let fifo = Fifo::<u64>::new(
            2,
            Some(Box::new(|new, tail, _head| {
                *tail += *new;
            })),
        );

        fifo.push(1);
        fifo.push(2);
        fifo.push(3); // folds into tail (2) -> 5, discarded otherwise

        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(5));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn overflow_callback_sees_head_and_new() {
        let fifo = Fifo::<(u64, u64)>::new(
            2,
            Some(Box::new(|new, tail, head| {
                // Record what was observed by encoding into the tail.
                tail.1 = new.0 + head.0;
            })),
        );
        fifo.push((10, 0));
        fifo.push((20, 0));
        fifo.push((30, 0));

        assert_eq!(fifo.pop(), Some((10, 0)));
        let tail = fifo.pop().unwrap();
        assert_eq!(tail.1, 30 + 10);
    }

    #[test]
    fn overflow_without_callback_discards_new_item() {
        let fifo = Fifo::<u64>::new(1, None);
        fifo.push(1);
        fifo.push(2);
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo.pop(), Some(1));
    }

    #[test]
    fn single_slot_overflow_discards_without_invoking_callback() {
        let fifo = Fifo::<u64>::new(
            1,
            Some(Box::new(|_new, _tail, _head| {
                panic!("head and tail alias in a single-slot fifo; callback must not run");
            })),
        );
        fifo.push(5);
        fifo.push(7);
        assert_eq!(fifo.pop(), Some(5));
    }

    #[test]
    fn clear_empties_without_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let fifo = Fifo::<u64>::new(
            4,
            Some(Box::new(move |_new, _tail, _head| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );
        fifo.push(1);
        fifo.push(2);
        fifo.clear();
        assert!(fifo.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
