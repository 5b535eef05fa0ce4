//! Fixed-capacity sample window for rolling averages.

use std::collections::VecDeque;
use std::time::Duration;

/// Keeps the most recent `capacity` samples; older ones fall off the front.
pub struct RingBuffer<T> {
    window: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<T> {
        self.window.back().copied()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl RingBuffer<Duration> {
    /// Mean of the window, zero when empty.
    pub fn average(&self) -> Duration {
        match self.window.len() {
            0 => Duration::ZERO,
            n => self.window.iter().sum::<Duration>() / n as u32,
        }
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        self.window
            .iter()
            .fold(None, |range: Option<(Duration, Duration)>, &d| match range {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
            .unwrap_or_default()
    }
}
