//! Receive delay buffer.
//!
//! Smooths out jittered arrival by holding each payload until
//! `max(now, presentation_timestamp + D)`, re-clamped against a recomputed
//! clock offset so a burst of late/jittered timestamps can't push the
//! buffer's horizon arbitrarily far into the future. The delay list is a
//! plain sorted `Vec`, owned entirely by the delay thread (per §5: "no lock
//! needed") — only the input/output queues cross thread boundaries.

use crate::queue::Queue;
use crate::{Config, Signal};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::error;

/// Open Question resolved (DESIGN.md): three consecutive out-of-window
/// timestamps force a clock-offset recalibration rather than individually
/// clamping forever, bounding how long a drifting sender can push entries
/// to the clamp boundary before the buffer just resyncs to it.
pub const MAX_MISSED: u32 = 3;

/// A delayed payload: a presentation timestamp plus opaque callback data
/// the caller uses to complete delivery once the delay window elapses.
pub struct PayloadCallback<T> {
    /// Presentation timestamp, microseconds, arbitrary origin consistent
    /// across a stream.
    pub presentation_us: i64,
    /// Host wall-clock microseconds at which this payload should be
    /// forwarded to the output queue.
    pub send_time_us: i64,
    pub data: T,
}

/// Hook invoked when a payload can't be handed to the output queue (e.g.
/// it's full and ungrown); gives the caller a chance to reclaim any buffer
/// backing `data` instead of leaking it.
pub type PayloadErrorFreeBuffer<T> = Box<dyn Fn(T) + Send>;

struct Calibration {
    t_offset_us: i64,
    missed_count: u32,
}

/// Owns the delay list and the recalibration state machine from spec §4.5.
pub struct DelayBuffer<T: Send + 'static> {
    delay_us: i64,
    calibration: Calibration,
    list: Vec<PayloadCallback<T>>,
    input: Arc<Queue<PayloadCallback<T>>>,
    output: Arc<Queue<PayloadCallback<T>>>,
    on_drop: Option<PayloadErrorFreeBuffer<T>>,
    shutdown: Signal,
}

impl<T: Send + 'static> DelayBuffer<T> {
    /// Creates a delay buffer with window `delay`, backed by `input` (the
    /// buffer's own input queue) and forwarding to the externally supplied
    /// `output` queue.
    pub fn new(
        delay: Duration,
        input: Arc<Queue<PayloadCallback<T>>>,
        output: Arc<Queue<PayloadCallback<T>>>,
        on_drop: Option<PayloadErrorFreeBuffer<T>>,
    ) -> Self {
        Self {
            delay_us: delay.as_micros() as i64,
            calibration: Calibration {
                t_offset_us: 0,
                missed_count: 0,
            },
            list: Vec::new(),
            input,
            output,
            on_drop,
            shutdown: Signal::new(),
        }
    }

    /// Number of payloads currently held in the delay list.
    pub fn pending_count(&self) -> usize {
        self.list.len()
    }

    fn now_us() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64
    }

    /// Admits one payload: recalibrates the clock offset if needed,
    /// computes its send time, and either forwards it immediately or
    /// inserts it into the sorted delay list.
    pub fn admit(&mut self, presentation_us: i64, data: T) {
        let now = Self::now_us();
        let d = self.delay_us;

        let projected = self.calibration.t_offset_us + presentation_us;
        if self.calibration.missed_count >= MAX_MISSED {
            self.calibration.t_offset_us = now - presentation_us;
            self.calibration.missed_count = 0;
        } else if projected < now - d || projected > now {
            self.calibration.missed_count += 1;
        } else {
            self.calibration.missed_count = 0;
        }

        let mut send_time_us = presentation_us + d + self.calibration.t_offset_us;
        send_time_us = send_time_us.min(now + d);

        let entry = PayloadCallback {
            presentation_us,
            send_time_us,
            data,
        };

        if send_time_us <= now {
            self.forward(entry);
            return;
        }

        // Only entries actually held in the delay list are asserted into
        // the `[now, now + d]` window; an immediately-forwarded entry (just
        // returned above) is allowed a send_time in the past.
        crate::invariants::debug_assert_send_time_in_window!(send_time_us, now, d);

        let pos = self
            .list
            .partition_point(|e| e.send_time_us <= send_time_us);
        self.list.insert(pos, entry);
    }

    fn forward(&self, entry: PayloadCallback<T>) {
        if let Err((err, rejected)) = self.output.push_recoverable(entry) {
            error!(?err, "output queue rejected payload, dropping");
            if let Some(on_drop) = &self.on_drop {
                on_drop(rejected.data);
            }
        }
    }

    /// Drains every entry whose `send_time` has arrived (or, as a
    /// host-clock-rewind guard, drifted past `now + D`), forwarding each to
    /// the output queue. Returns the recommended next wait duration: `None`
    /// means the list is empty (wait indefinitely for new input).
    pub fn drain_ready(&mut self) -> Option<Duration> {
        let now = Self::now_us();
        let d = self.delay_us;

        let mut split_at = 0;
        for entry in &self.list {
            if entry.send_time_us <= now || entry.send_time_us > now + d {
                split_at += 1;
            } else {
                break;
            }
        }

        let ready: Vec<_> = self.list.drain(..split_at).collect();
        for entry in ready {
            self.forward(entry);
        }

        self.list.first().map(|head| {
            let remaining_us = (head.send_time_us - Self::now_us()).max(1000);
            Duration::from_micros(remaining_us as u64)
        })
    }

    /// Pulls everything currently on the input queue into the delay list
    /// (non-blocking), running the admission/recalibration logic on each.
    pub fn drain_input(&mut self) {
        while let Some(entry) = self.input.pop() {
            self.admit(entry.presentation_us, entry.data);
        }
    }

    /// Flushes every remaining entry to the output queue unconditionally.
    /// Called on shutdown.
    pub fn flush_all(&mut self) {
        let remaining: Vec<_> = self.list.drain(..).collect();
        for entry in remaining {
            self.forward(entry);
        }
    }

    pub fn shutdown_signal(&self) -> &Signal {
        &self.shutdown
    }
}

/// Owns the delay thread described by spec §4.5/§5: drains the input
/// queue, runs admission/recalibration, and forwards ready entries to the
/// output queue on every wake-up. The delay list itself never crosses a
/// thread boundary — only [`DelayBuffer`]'s input/output queues do.
pub struct DelayService<T: Send + 'static> {
    shutdown: Signal,
    thread: Option<std::thread::JoinHandle<()>>,
    _marker: std::marker::PhantomData<T>,
}

/// Upper bound on how long the delay thread sleeps between checks even
/// when nothing is due, so `shutdown` is always noticed promptly.
const DELAY_POLL_CAP: Duration = Duration::from_millis(50);

impl<T: Send + 'static> DelayService<T> {
    /// Spawns the delay thread, taking ownership of `buffer`.
    pub fn start(mut buffer: DelayBuffer<T>) -> crate::Result<Self> {
        let shutdown = buffer.shutdown.clone();
        let input = Arc::clone(&buffer.input);

        let thread = std::thread::Builder::new()
            .name("mtk-delay".into())
            .spawn(move || loop {
                let next_wait = buffer.drain_ready();

                if buffer.shutdown.get() {
                    buffer.drain_input();
                    buffer.flush_all();
                    return;
                }

                let poll = match next_wait {
                    Some(w) => w.min(DELAY_POLL_CAP),
                    None => DELAY_POLL_CAP,
                };
                if let Some(entry) = input.pop_wait(Some(poll)) {
                    buffer.admit(entry.presentation_us, entry.data);
                }
            })
            .map_err(|_| crate::KernelError::CreateThreadFailed)?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
            _marker: std::marker::PhantomData,
        })
    }

    /// Signals the delay thread to flush remaining entries and exit, then
    /// joins it.
    pub fn shutdown(&mut self) {
        self.shutdown.set();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl<T: Send + 'static> Drop for DelayService<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn fresh_pair() -> (Arc<Queue<PayloadCallback<u64>>>, Arc<Queue<PayloadCallback<u64>>>) {
        (
            Arc::new(Queue::new(Config::default(), false)),
            Arc::new(Queue::new(Config::default(), false)),
        )
    }

    #[test]
    fn immediate_forward_when_send_time_already_past() {
        let (input, output) = fresh_pair();
        let mut buf = DelayBuffer::new(Duration::from_millis(0), input, output.clone(), None);
        let now = DelayBuffer::<u64>::now_us();
        buf.admit(now - 1_000_000, 42);
        assert_eq!(buf.pending_count(), 0);
        assert!(output.pop().is_some());
    }

    #[test]
    fn future_timestamp_is_held_in_sorted_list() {
        let (input, output) = fresh_pair();
        let mut buf = DelayBuffer::new(Duration::from_millis(100), input, output, None);
        let now = DelayBuffer::<u64>::now_us();
        buf.admit(now, 1);
        assert_eq!(buf.pending_count(), 1);
    }

    #[test]
    fn list_stays_sorted_by_send_time_on_insert() {
        let (input, output) = fresh_pair();
        let mut buf = DelayBuffer::new(Duration::from_millis(50), input, output, None);
        let now = DelayBuffer::<u64>::now_us();
        buf.admit(now + 30_000, 1);
        buf.admit(now + 10_000, 2);
        buf.admit(now + 20_000, 3);

        let send_times: Vec<_> = buf.list.iter().map(|e| e.send_time_us).collect();
        let mut sorted = send_times.clone();
        sorted.sort_unstable();
        assert_eq!(send_times, sorted);
    }

    #[test]
    fn drain_ready_forwards_expired_entries() {
        let (input, output) = fresh_pair();
        let mut buf = DelayBuffer::new(Duration::from_millis(1), input, output.clone(), None);
        let now = DelayBuffer::<u64>::now_us();
        buf.admit(now - 2_000, 7); // already in the past -> forwarded immediately
        assert!(output.pop().is_some());

        std::thread::sleep(Duration::from_millis(5));
        let next_wait = buf.drain_ready();
        assert!(next_wait.is_none());
    }

    #[test]
    fn flush_all_empties_pending_list() {
        let (input, output) = fresh_pair();
        let mut buf = DelayBuffer::new(Duration::from_secs(10), input, output.clone(), None);
        let now = DelayBuffer::<u64>::now_us();
        buf.admit(now, 1);
        buf.admit(now, 2);
        assert_eq!(buf.pending_count(), 2);
        buf.flush_all();
        assert_eq!(buf.pending_count(), 0);
        assert!(output.pop().is_some());
        assert!(output.pop().is_some());
    }

    #[test]
    fn missed_count_triggers_recalibration() {
        let (input, output) = fresh_pair();
        let mut buf = DelayBuffer::new(Duration::from_millis(50), input, output, None);
        let now = DelayBuffer::<u64>::now_us();

        // Feed timestamps far outside [now-D, now] repeatedly; after
        // MAX_MISSED misses the next admit recalibrates t_offset to match.
        for _ in 0..MAX_MISSED {
            buf.admit(now - 10_000_000, 0);
        }
        assert_eq!(buf.calibration.missed_count, MAX_MISSED);

        buf.admit(now - 10_000_000, 0);
        assert_eq!(buf.calibration.missed_count, 0);
    }

    #[test]
    fn service_forwards_payload_pushed_on_input_queue() {
        let (input, output) = fresh_pair();
        let buf = DelayBuffer::new(Duration::from_millis(20), input.clone(), output.clone(), None);
        let mut service = DelayService::start(buf).unwrap();

        let now = DelayBuffer::<u64>::now_us();
        input
            .push(PayloadCallback {
                presentation_us: now,
                send_time_us: 0,
                data: 7,
            })
            .unwrap();

        let got = output.pop_wait(Some(Duration::from_secs(2)));
        assert_eq!(got.map(|e| e.data), Some(7));
        service.shutdown();
    }

    #[test]
    fn service_flushes_pending_entries_on_shutdown() {
        let (input, output) = fresh_pair();
        let buf = DelayBuffer::new(Duration::from_secs(10), input.clone(), output.clone(), None);
        let mut service = DelayService::start(buf).unwrap();

        let now = DelayBuffer::<u64>::now_us();
        input
            .push(PayloadCallback {
                presentation_us: now,
                send_time_us: 0,
                data: 99,
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));

        service.shutdown();
        let got = output.pop();
        assert_eq!(got.map(|e| e.data), Some(99));
    }
}
