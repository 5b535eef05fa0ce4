//! Wall-clock time of whole frame updates (schedule plus wait).

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

pub struct FrameTimer {
    started: Option<Instant>,
    window: RingBuffer<Duration>,
    frames: u64,
}

impl FrameTimer {
    /// Averages cover the last `window` frames.
    pub fn new(window: usize) -> Self {
        Self {
            started: None,
            window: RingBuffer::new(window),
            frames: 0,
        }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the frame opened by `begin`; unmatched calls are ignored.
    pub fn end(&mut self) {
        if let Some(started) = self.started.take() {
            self.window.push(started.elapsed());
            self.frames += 1;
        }
    }

    /// Frames closed since construction.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn fps(&self) -> f64 {
        match self.window.average().as_secs_f64() {
            avg if avg > 0.0 => 1.0 / avg,
            _ => 0.0,
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.window.average().as_secs_f64() * 1000.0
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.window.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_matched_frames_count() {
        let mut timer = FrameTimer::new(4);
        timer.end();
        assert_eq!(timer.frames(), 0);
        assert_eq!(timer.fps(), 0.0);

        timer.begin();
        std::thread::sleep(Duration::from_millis(2));
        timer.end();
        timer.end();
        assert_eq!(timer.frames(), 1);
        assert!(timer.frame_time_ms() >= 2.0);
    }
}
