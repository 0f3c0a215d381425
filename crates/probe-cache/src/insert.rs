use std::time::Duration;

use keyprobe_core::ProbeOutcome;

use crate::CacheStore;

impl CacheStore {
    /// Unconditional overwrite: a fresh failure replaces a cached success.
    pub fn record(&mut self, identity: impl Into<String>, outcome: ProbeOutcome) {
        self.entries.insert(identity.into(), outcome);
    }

    /// Drops entries stamped before `now - retention`. Returns how many went.
    pub fn evict_older_than(&mut self, retention: Duration, now: i64) -> usize {
        let cutoff = now.saturating_sub(i64::try_from(retention.as_secs()).unwrap_or(i64::MAX));
        let before = self.entries.len();
        self.entries.retain(|_, o| o.timestamp() >= cutoff);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::CacheStore;
    use keyprobe_core::ProbeOutcome;
    use std::time::Duration;

    const HOUR: u64 = 3600;

    fn store() -> CacheStore {
        CacheStore::new(Duration::from_secs(6 * HOUR))
    }

    #[test]
    fn lookup_honors_liveness_and_freshness() {
        let mut c = store();
        let now = 100_000;
        c.record("a", ProbeOutcome::alive(120, "DE", now - 60));
        c.record("b", ProbeOutcome::dead("DE", now - 60));
        c.record("c", ProbeOutcome::alive(90, "NL", now - 6 * HOUR as i64));
        c.record("d", ProbeOutcome::alive(90, "NL", now - 6 * HOUR as i64 + 1));
        assert_eq!(c.lookup("a", now).and_then(|o| o.latency_ms()), Some(120));
        assert!(c.lookup("b", now).is_none());
        assert!(c.lookup("c", now).is_none());
        assert!(c.lookup("d", now).is_some());
        assert!(c.lookup("missing", now).is_none());
        let s = c.stats(now);
        assert_eq!((s.total, s.alive, s.dead, s.reusable), (4, 3, 1, 2));
    }

    #[test]
    fn failure_overwrites_success() {
        let mut c = store();
        c.record("a", ProbeOutcome::alive(50, "US", 10));
        c.record("a", ProbeOutcome::dead("US", 20));
        assert!(c.lookup("a", 20).is_none());
        assert_eq!(c.get("a").map(|o| o.timestamp()), Some(20));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn eviction_keeps_dead_entries_inside_retention() {
        let mut c = store();
        let now = 1_000_000;
        let retention = Duration::from_secs(72 * HOUR);
        c.record("old", ProbeOutcome::alive(1, "X", now - 72 * HOUR as i64 - 1));
        c.record("edge", ProbeOutcome::dead("X", now - 72 * HOUR as i64));
        c.record("new", ProbeOutcome::dead("X", now));
        assert_eq!(c.evict_older_than(retention, now), 1);
        let mut left: Vec<_> = c.iter().map(|(k, _)| k).collect();
        left.sort();
        assert_eq!(left, vec!["edge", "new"]);
    }
}
