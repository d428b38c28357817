//! Receive-rate flood detection.
//!
//! This is a fixed-window counter, not a sliding window. Each delivered frame
//! is counted first; when that record lands at or after the end of the
//! current window, the window (closing frame included) is judged and a fresh
//! one starts empty. A burst straddling a boundary is split across two
//! windows and may go unnoticed.
//!
//! The detector only reports. Whether a flooding peer is dropped is up to
//! the application handling the `FloodDetected` event.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::utils::time::{Clock, MonotonicClock};

/// Raised when a closed window held more receives than allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodSignal {
    /// Frames counted in the window that was just closed
    pub receives: u32,
    /// Configured limit
    pub max_receives: u32,
    /// Actual length of the closed window
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct FloodDetector<K: Clock = MonotonicClock> {
    max_receives: u32,
    window: Duration,
    receives_in_window: u32,
    window_start: Instant,
    clock: K,
}

impl FloodDetector<MonotonicClock> {
    pub fn new(max_receives: u32, window: Duration) -> Self {
        Self::with_clock(max_receives, window, MonotonicClock)
    }
}

impl<K: Clock> FloodDetector<K> {
    pub fn with_clock(max_receives: u32, window: Duration, clock: K) -> Self {
        let window_start = clock.now();
        Self {
            max_receives,
            window,
            receives_in_window: 0,
            window_start,
            clock,
        }
    }

    pub fn max_receives(&self) -> u32 {
        self.max_receives
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Frames counted so far in the open window
    pub fn receives_in_window(&self) -> u32 {
        self.receives_in_window
    }

    /// Record one delivered frame.
    ///
    /// The frame is counted before the window is judged, so the frame that
    /// closes a window belongs to it. Returns a signal when this call closed
    /// a window whose count exceeded the limit; at most one per window.
    pub fn record(&mut self) -> Option<FloodSignal> {
        self.receives_in_window = self.receives_in_window.saturating_add(1);

        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let receives = std::mem::take(&mut self.receives_in_window);
        self.window_start = now;
        if receives <= self.max_receives {
            return None;
        }

        debug!(
            receives,
            max_receives = self.max_receives,
            elapsed_ms = elapsed.as_millis() as u64,
            "Flood window exceeded"
        );
        Some(FloodSignal {
            receives,
            max_receives: self.max_receives,
            elapsed,
        })
    }

    /// Forget the current window and start a new one now
    pub fn reset(&mut self) {
        self.window_start = self.clock.now();
        self.receives_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::ManualClock;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn detector(max: u32) -> (FloodDetector<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (FloodDetector::with_clock(max, WINDOW, clock.clone()), clock)
    }

    #[test]
    fn test_over_limit_signals_once_when_window_closes() {
        let (mut d, clock) = detector(3);
        for _ in 0..4 {
            assert!(d.record().is_none());
        }

        clock.advance(WINDOW);
        let signal = d.record().expect("window with 5 receives should signal");
        assert_eq!(signal.receives, 5);
        assert_eq!(signal.max_receives, 3);

        // the next window starts empty
        assert_eq!(d.receives_in_window(), 0);
        clock.advance(WINDOW);
        assert!(d.record().is_none());
    }

    #[test]
    fn test_closing_frame_counts_in_the_closed_window() {
        let (mut d, clock) = detector(3);
        for _ in 0..3 {
            assert!(d.record().is_none());
        }

        clock.advance(WINDOW);
        let signal = d
            .record()
            .expect("three frames plus the closing one exceed a limit of three");
        assert_eq!(signal.receives, 4);
    }

    #[test]
    fn test_at_limit_never_signals() {
        let (mut d, clock) = detector(3);
        for _ in 0..2 {
            assert!(d.record().is_none());
        }
        clock.advance(WINDOW);
        assert!(d.record().is_none());
        assert_eq!(d.receives_in_window(), 0);
    }

    #[test]
    fn test_no_signal_before_window_elapses() {
        let (mut d, clock) = detector(1);
        for _ in 0..50 {
            clock.advance(Duration::from_millis(10));
            assert!(d.record().is_none());
        }
        assert_eq!(d.receives_in_window(), 50);
    }

    #[test]
    fn test_burst_straddling_boundary_is_split() {
        let (mut d, clock) = detector(3);
        clock.advance(Duration::from_millis(900));
        for _ in 0..2 {
            assert!(d.record().is_none());
        }
        clock.advance(Duration::from_millis(150));
        // 5 frames in 150ms, but each window only saw 3 or fewer
        for _ in 0..3 {
            assert!(d.record().is_none());
        }
        clock.advance(WINDOW);
        assert!(d.record().is_none());
    }

    #[test]
    fn test_reset_discards_count() {
        let (mut d, clock) = detector(1);
        d.record();
        d.record();
        d.reset();
        clock.advance(WINDOW);
        assert!(d.record().is_none());
    }
}
