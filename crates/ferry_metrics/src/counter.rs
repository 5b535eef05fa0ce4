//! Named counters, typically one entry per instance store and snapshot.

use std::collections::BTreeMap;

#[derive(Default)]
pub struct Counter {
    counters: BTreeMap<String, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &str, value: usize) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Overwrite a gauge-like counter (e.g. the live snapshot length).
    pub fn set(&mut self, name: &str, value: usize) {
        match self.counters.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.counters.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    /// Iterate in name order so reports are stable between frames.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
