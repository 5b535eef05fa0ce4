//! Accumulated wall time per named frame stage (cancel requests, cancel
//! flow, consolidation, jobs, cancel complete). Only the main-thread
//! scheduling cost is measured; the jobs themselves run elsewhere.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct StageProfiler {
    timings: HashMap<&'static str, Duration>,
}

impl StageProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_stage<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        *self.timings.entry(name).or_insert(Duration::ZERO) += start.elapsed();
        result
    }

    pub fn get_timing(&self, name: &str) -> Duration {
        self.timings.get(name).copied().unwrap_or(Duration::ZERO)
    }

    pub fn reset(&mut self) {
        self.timings.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.timings.iter().map(|(k, v)| (*k, *v))
    }
}
