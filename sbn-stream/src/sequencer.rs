#![forbid(unsafe_code)]
//! Reordering engine for a real-time broadcast feed.
//!
//! Frames arrive keyed by a strictly ordered sequence key and may be out of
//! order, duplicated, or missing. The sequencer buffers admitted frames and
//! releases them in non-decreasing key order: immediately when the next
//! expected key is present, otherwise once the oldest buffered frame has
//! waited out the failsafe timeout. The timeout trades completeness for
//! liveness; a permanently lost frame delays its successors by at most one
//! timeout instead of stalling the feed.
//!
//! Staleness is handled at admission: a frame older than the next expected
//! key is rejected outright, so the buffer never holds a frame that has
//! already been passed over.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::errors::SequenceError;
use sbn_core::types::SequenceKey;

/// A buffered frame and the deadline by which it must be delivered.
#[derive(Debug)]
struct Buffered<F> {
    frame: F,
    deadline: Instant,
}

#[derive(Debug)]
struct State<K, F> {
    /// Admitted frames in key order.
    frames: BTreeMap<K, Buffered<F>>,
    /// Admission deadlines mapped back to their keys; the first entry is the
    /// soonest frame to force out.
    deadlines: BTreeMap<Instant, K>,
    /// Successor of the last delivered key; unset before the first delivery.
    expected: Option<K>,
    shutdown: bool,
}

/// Buffer that releases frames in non-decreasing key order with a bounded
/// per-frame delay.
///
/// Wrap it in an `Arc` to share between the inserting thread and the
/// extracting thread.
#[derive(Debug)]
pub struct Sequencer<K, F> {
    state: Mutex<State<K, F>>,
    cond: Condvar,
    timeout: Duration,
}

impl<K: SequenceKey, F> Sequencer<K, F> {
    /// Creates an empty sequencer with the given failsafe `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                frames: BTreeMap::new(),
                deadlines: BTreeMap::new(),
                expected: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
            timeout,
        }
    }

    /// Creates a sequencer with the timeout from an
    /// [`sbn_core::IngestConfig`].
    pub fn with_config(config: &sbn_core::IngestConfig) -> Self {
        Self::new(config.sequence_timeout())
    }

    /// Tries to admit a frame. Returns `Ok(false)` without buffering anything
    /// if the key is older than the next expected key or is already buffered;
    /// both are routine in a live feed and not errors.
    ///
    /// Fails with [`SequenceError::ClockResolution`] if another admission
    /// already occupies the computed deadline; the frame is not admitted and
    /// buffered state is unchanged.
    pub fn try_insert(&self, key: K, frame: F) -> Result<bool, SequenceError> {
        let mut state = self.lock();
        if state.shutdown {
            return Err(SequenceError::Shutdown);
        }
        if let Some(expected) = &state.expected {
            if key < *expected {
                debug!(?key, ?expected, "frame arrived too late; dropping");
                return Ok(false);
            }
        }
        if state.frames.contains_key(&key) {
            return Ok(false);
        }

        let deadline = Instant::now() + self.timeout;
        if state.deadlines.contains_key(&deadline) {
            // Refusing up front keeps the admission atomic: nothing to roll
            // back on this failure.
            return Err(SequenceError::ClockResolution);
        }
        state.deadlines.insert(deadline, key.clone());
        state.frames.insert(key, Buffered { frame, deadline });
        self.cond.notify_all();
        Ok(true)
    }

    /// Returns the next frame in key order, blocking until either the
    /// expected key is buffered or the oldest buffered frame's failsafe
    /// deadline elapses. In-order delivery wins when both hold.
    ///
    /// After [`shutdown`](Self::shutdown), remaining frames drain in key
    /// order without waiting; once empty this fails with
    /// [`SequenceError::Shutdown`].
    pub fn get_frame(&self) -> Result<(K, F), SequenceError> {
        let mut state = self.lock();
        loop {
            if state.frames.is_empty() {
                if state.shutdown {
                    return Err(SequenceError::Shutdown);
                }
                state = self.wait(state);
                continue;
            }
            if state.shutdown {
                // No more input can arrive; waiting out deadlines would only
                // add latency.
                break;
            }
            let first_is_expected = match (&state.expected, state.frames.keys().next()) {
                (Some(expected), Some(first)) => first == expected,
                _ => false,
            };
            if first_is_expected {
                break;
            }
            let Some((&earliest, _)) = state.deadlines.first_key_value() else {
                // Deadlines track frames one-to-one; nothing to wait on.
                break;
            };
            let now = Instant::now();
            if earliest <= now {
                break;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, earliest - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }

        let Some((key, buffered)) = state.frames.pop_first() else {
            // Unreachable: the loop above only breaks with a frame buffered.
            return Err(SequenceError::Shutdown);
        };
        state.deadlines.remove(&buffered.deadline);
        state.expected = Some(key.next());
        Ok((key, buffered.frame))
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts the sequencer down. Idempotent. Subsequent
    /// [`try_insert`](Self::try_insert) calls fail; buffered frames remain
    /// retrievable via [`get_frame`](Self::get_frame) without the failsafe
    /// wait.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if !state.shutdown {
            debug!(buffered = state.frames.len(), "sequencer shut down");
            state.shutdown = true;
        }
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, State<K, F>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State<K, F>>) -> MutexGuard<'a, State<K, F>> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbn_core::types::FrameId;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn reorders_out_of_order_arrivals() {
        let seq = Sequencer::new(Duration::from_millis(100));
        assert!(seq.try_insert(5u32, "f5").expect("insert"));
        assert!(seq.try_insert(3u32, "f3").expect("insert"));
        assert!(seq.try_insert(4u32, "f4").expect("insert"));

        assert_eq!(seq.get_frame().expect("get"), (3, "f3"));
        assert_eq!(seq.get_frame().expect("get"), (4, "f4"));
        assert_eq!(seq.get_frame().expect("get"), (5, "f5"));
    }

    #[test]
    fn lone_frame_waits_out_timeout() {
        let seq = Sequencer::new(SHORT);
        assert!(seq.try_insert(10u32, "f10").expect("insert"));

        let start = Instant::now();
        assert_eq!(seq.get_frame().expect("get"), (10, "f10"));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "returned after {elapsed:?}");

        // Expected key advanced to 11: its arrival delivers immediately.
        assert!(seq.try_insert(11u32, "f11").expect("insert"));
        let start = Instant::now();
        assert_eq!(seq.get_frame().expect("get"), (11, "f11"));
        assert!(start.elapsed() < SHORT, "expected key should not wait");
    }

    #[test]
    fn rejects_stale_and_duplicate_keys() {
        let seq = Sequencer::new(SHORT);
        assert!(seq.try_insert(10u32, 'a').expect("insert"));
        assert_eq!(seq.get_frame().expect("get"), (10, 'a'));

        // Expected key is now 11; 10 is stale.
        assert!(!seq.try_insert(10u32, 'b').expect("insert"));
        assert!(seq.try_insert(11u32, 'c').expect("insert"));
        // Already buffered: rejected, original untouched.
        assert!(!seq.try_insert(11u32, 'd').expect("insert"));
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.get_frame().expect("get"), (11, 'c'));
    }

    #[test]
    fn never_delivers_a_key_twice() {
        let seq = Sequencer::new(SHORT);
        for key in [2u32, 0, 1, 2, 0] {
            let _ = seq.try_insert(key, key).expect("insert");
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (key, _) = seq.get_frame().expect("get");
            seen.push(key);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn blocked_get_wakes_on_insert() {
        let seq = Arc::new(Sequencer::new(Duration::from_secs(10)));
        let s = Arc::clone(&seq);
        let getter = thread::spawn(move || s.get_frame());
        thread::sleep(SHORT);

        // The first-ever delivery has no expected key, so it rides the
        // failsafe deadline; shutdown drains it immediately instead.
        assert!(seq.try_insert(FrameId::new(1, 7), "frame").expect("insert"));
        seq.shutdown();
        assert_eq!(getter.join().expect("join").expect("get"), (FrameId::new(1, 7), "frame"));
    }

    #[test]
    fn shutdown_drains_in_key_order_then_reports() {
        let seq = Sequencer::new(Duration::from_secs(3600));
        assert!(seq.try_insert(2u32, "b").expect("insert"));
        assert!(seq.try_insert(1u32, "a").expect("insert"));
        seq.shutdown();
        seq.shutdown(); // idempotent

        assert_eq!(seq.try_insert(3u32, "c").unwrap_err(), SequenceError::Shutdown);
        let start = Instant::now();
        assert_eq!(seq.get_frame().expect("get"), (1, "a"));
        assert_eq!(seq.get_frame().expect("get"), (2, "b"));
        assert!(start.elapsed() < Duration::from_secs(1), "drain must not wait");
        assert_eq!(seq.get_frame().unwrap_err(), SequenceError::Shutdown);
    }

    #[test]
    fn frame_id_keys_sequence_across_runs() {
        let seq = Sequencer::new(SHORT);
        assert!(seq.try_insert(FrameId::new(2, 0), "r2s0").expect("insert"));
        assert!(seq.try_insert(FrameId::new(1, 5), "r1s5").expect("insert"));

        assert_eq!(seq.get_frame().expect("get").0, FrameId::new(1, 5));
        assert_eq!(seq.get_frame().expect("get").0, FrameId::new(2, 0));
        // Expected key is 2/1 now; anything from run 1 is stale.
        assert!(!seq.try_insert(FrameId::new(1, 6), "late").expect("insert"));
    }
}
