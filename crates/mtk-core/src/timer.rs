//! Deadline-ordered timer service.
//!
//! Two threads cooperate, mirroring the kernel's endpoint rx/tx split: a
//! main thread owns the deadline-ordered entry list and does nothing but
//! decide what has expired, and a dispatch thread actually runs callbacks
//! off [`crate::queue::Queue`] so a slow callback cannot delay the clock
//! thread's next wakeup.
//!
//! [`TimerHandle`] carries a slab index plus a process-wide monotonic
//! generation counter (spec §9): once an entry fires or is removed, its
//! slot is freed but the generation that minted the handle is never
//! reused, so calling [`TimerService::remove`] with a handle for an
//! already-fired timer is a safe no-op rather than a dangling-index bug.

use crate::queue::Queue;
use crate::signal::{wait_many, Signal, WaitOutcome};
use crate::Config;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send>;

/// A handle to a scheduled timer. Opaque; only useful with the
/// [`TimerService`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    index: usize,
    generation: u64,
}

struct Entry {
    generation: u64,
    deadline: Instant,
    seq: u64,
    callback: Option<Callback>,
}

struct Slots {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    /// Ordered by deadline, then by insertion sequence, then by slab
    /// index, so the earliest-expiring entry is always
    /// `order.iter().next()`. The sequence number is what actually
    /// breaks ties between equal deadlines in insertion order (spec
    /// §4.4) — slab index alone would tie-break by slot reuse instead,
    /// since `free.pop()` hands back non-monotonic indices.
    order: BTreeSet<(Instant, u64, usize)>,
    next_seq: u64,
}

struct Shared {
    slots: Mutex<Slots>,
    next_generation: AtomicU64,
    dispatch: Queue<Callback>,
    /// Set whenever a new entry is added with a deadline earlier than
    /// anything the main thread was previously waiting on, so it re-reads
    /// the order list instead of sleeping past the new earliest deadline.
    go: Signal,
    shutdown: Signal,
}

/// Owns the timer's background threads and entry list.
pub struct TimerService {
    shared: Arc<Shared>,
    main_thread: Option<JoinHandle<()>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Starts the timer's main and dispatch threads.
    pub fn start() -> crate::Result<Self> {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                order: BTreeSet::new(),
                next_seq: 0,
            }),
            next_generation: AtomicU64::new(1),
            dispatch: Queue::new(Config::default(), false),
            go: Signal::new(),
            shutdown: Signal::new(),
        });

        let main_shared = Arc::clone(&shared);
        let main_thread = std::thread::Builder::new()
            .name("mtk-timer-main".into())
            .spawn(move || main_loop(main_shared))
            .map_err(|_| crate::KernelError::CreateThreadFailed)?;

        let dispatch_shared = Arc::clone(&shared);
        let dispatch_thread = std::thread::Builder::new()
            .name("mtk-timer-dispatch".into())
            .spawn(move || dispatch_loop(dispatch_shared))
            .map_err(|_| crate::KernelError::CreateThreadFailed)?;

        Ok(Self {
            shared,
            main_thread: Some(main_thread),
            dispatch_thread: Some(dispatch_thread),
        })
    }

    /// Schedules `callback` to run after `delay`. Returns a handle usable
    /// with [`TimerService::remove`].
    pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerHandle {
        let deadline = Instant::now() + delay;
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut slots = self.shared.slots.lock().unwrap();
        let index = slots.free.pop().unwrap_or_else(|| {
            slots.entries.push(None);
            slots.entries.len() - 1
        });
        let earliest_before = slots.order.iter().next().map(|(d, ..)| *d);
        let seq = slots.next_seq;
        slots.next_seq += 1;
        slots.entries[index] = Some(Entry {
            generation,
            deadline,
            seq,
            callback: Some(Box::new(callback)),
        });
        slots.order.insert((deadline, seq, index));
        drop(slots);

        let wakes_main = match earliest_before {
            Some(d) => deadline < d,
            None => true,
        };
        if wakes_main {
            self.shared.go.set();
        }

        TimerHandle { index, generation }
    }

    /// Cancels a scheduled timer. Returns `true` if it was pending and is
    /// now cancelled; `false` if it had already fired, had already been
    /// removed, or the handle is otherwise stale.
    pub fn remove(&self, handle: TimerHandle) -> bool {
        let mut slots = self.shared.slots.lock().unwrap();
        let matches = matches!(&slots.entries[handle.index], Some(e) if e.generation == handle.generation);
        if !matches {
            return false;
        }
        let entry = slots.entries[handle.index].take().expect("checked Some above");
        slots.order.remove(&(entry.deadline, entry.seq, handle.index));
        slots.free.push(handle.index);
        true
    }

    /// Number of timers currently pending.
    pub fn pending_count(&self) -> usize {
        self.shared.slots.lock().unwrap().order.len()
    }

    /// Signals both background threads to stop and joins them.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.set();
        self.shared.go.set();
        self.shared.dispatch.destroy();
        if let Some(t) = self.main_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.dispatch_thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        if self.main_thread.is_some() || self.dispatch_thread.is_some() {
            self.shutdown();
        }
    }
}

fn main_loop(shared: Arc<Shared>) {
    loop {
        if shared.shutdown.get() {
            return;
        }

        let earliest = shared.slots.lock().unwrap().order.iter().next().copied();

        match earliest {
            None => {
                wait_many(&[&shared.shutdown, &shared.go], None);
                shared.go.clear();
            }
            Some((deadline, ..)) => {
                let now = Instant::now();
                if now >= deadline {
                    drain_expired(&shared, now);
                    continue;
                }
                match wait_many(&[&shared.shutdown, &shared.go], Some(deadline - now)) {
                    WaitOutcome::Signaled(0) => return,
                    WaitOutcome::Signaled(_) => shared.go.clear(),
                    WaitOutcome::Timeout => {}
                }
            }
        }
    }
}

fn drain_expired(shared: &Arc<Shared>, now: Instant) {
    let mut slots = shared.slots.lock().unwrap();
    let expired: Vec<(Instant, u64, usize)> = slots
        .order
        .iter()
        .copied()
        .take_while(|(deadline, ..)| *deadline <= now)
        .collect();

    let mut prev_deadline = None;
    for (deadline, ..) in &expired {
        if let Some(prev) = prev_deadline {
            crate::invariants::debug_assert_timer_list_ordered!(prev, *deadline);
        }
        prev_deadline = Some(*deadline);
    }

    for key @ (_, _, index) in &expired {
        slots.order.remove(key);
        if let Some(entry) = slots.entries[*index].take() {
            slots.free.push(*index);
            if let Some(callback) = entry.callback {
                // The dispatch queue has no growth configured; a saturated
                // queue drops the callback rather than block the clock
                // thread. Starving the timer thread on a full dispatch
                // queue would delay every other pending deadline.
                let _ = shared.dispatch.push(callback);
            }
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        match shared.dispatch.pop_wait(Some(Duration::from_millis(50))) {
            Some(callback) => callback(),
            None => {
                if shared.shutdown.get() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn schedule_fires_after_delay() {
        let timer = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn remove_before_fire_prevents_callback() {
        let timer = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = timer.schedule(Duration::from_millis(50), move || {
            tx.send(()).unwrap();
        });
        assert!(timer.remove(handle));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn remove_after_fire_is_safe_noop() {
        let timer = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = timer.schedule(Duration::from_millis(10), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        // Entry already fired and freed its slot; removing again must not
        // panic or affect a since-reused slot.
        assert!(!timer.remove(handle));
    }

    #[test]
    fn earlier_deadline_wakes_sleeping_main_thread() {
        let timer = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_secs(5), || {});
        timer.schedule(Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn shutdown_stops_background_threads() {
        let mut timer = TimerService::start().unwrap();
        timer.schedule(Duration::from_secs(30), || {});
        timer.shutdown();
        assert!(timer.main_thread.is_none());
    }
}
