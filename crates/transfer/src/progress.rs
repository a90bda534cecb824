//! Throughput and ETA over a sliding window of progress reports.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use codedrop_protocol::TransferProgress;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Tracks transfer speed from the cumulative byte counts reported by the
/// sender or receiver.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    last: Option<TransferProgress>,
    window: Duration,
    max_samples: usize,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl SpeedCalculator {
    /// Keeps at most `max_samples` reports no older than `window`.
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            last: None,
            window,
            max_samples: max_samples.max(2),
        }
    }

    pub fn record(&mut self, progress: TransferProgress) {
        self.record_at(progress, Instant::now());
    }

    pub fn record_at(&mut self, progress: TransferProgress, at: Instant) {
        // A smaller count means a new transfer started.
        if self
            .last
            .is_some_and(|p| progress.bytes_transferred < p.bytes_transferred)
        {
            self.reset();
        }
        self.last = Some(progress);
        self.samples.push_back((at, progress.bytes_transferred));

        while self
            .samples
            .front()
            .is_some_and(|(t, _)| at.saturating_duration_since(*t) > self.window)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Bytes per second across the window; 0.0 until two reports exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some((t0, b0)), Some((t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.saturating_duration_since(*t0);
        if elapsed.is_zero() {
            return 0.0;
        }
        b1.saturating_sub(*b0) as f64 / elapsed.as_secs_f64()
    }

    /// Time left for the most recently reported transfer, if the rate is
    /// known.
    pub fn eta(&self) -> Option<Duration> {
        let last = self.last?;
        if last.is_complete() {
            return Some(Duration::ZERO);
        }
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(last.remaining() as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last = None;
    }
}
