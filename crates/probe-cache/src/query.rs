use keyprobe_core::ProbeOutcome;
use serde::Serialize;

use crate::CacheStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
    /// Alive and inside the freshness window.
    pub reusable: usize,
}

impl CacheStore {
    /// The cached outcome, only when alive and still fresh at `now`.
    pub fn lookup(&self, identity: &str, now: i64) -> Option<&ProbeOutcome> {
        self.entries.get(identity).filter(|o| o.is_alive() && self.is_fresh(o, now))
    }

    pub fn get(&self, identity: &str) -> Option<&ProbeOutcome> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProbeOutcome)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn stats(&self, now: i64) -> CacheStats {
        let mut s = CacheStats { total: self.entries.len(), ..CacheStats::default() };
        for o in self.entries.values() {
            if o.is_alive() {
                s.alive += 1;
                if self.is_fresh(o, now) { s.reusable += 1; }
            } else {
                s.dead += 1;
            }
        }
        s
    }

    fn is_fresh(&self, o: &ProbeOutcome, now: i64) -> bool {
        let window = i64::try_from(self.freshness.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(o.timestamp()) < window
    }
}
