use keyprobe_core::{ProbeOutcome, UNKNOWN_COUNTRY};
use serde::{Deserialize, Serialize};

/// On-disk form of one cache record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub alive: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub time: i64,
    #[serde(default = "unknown_country")]
    pub country: String,
}

fn unknown_country() -> String {
    UNKNOWN_COUNTRY.to_string()
}

impl From<&ProbeOutcome> for CacheEntry {
    fn from(o: &ProbeOutcome) -> Self {
        CacheEntry {
            alive: o.is_alive(),
            latency_ms: o.latency_ms(),
            time: o.timestamp(),
            country: o.country().to_string(),
        }
    }
}

impl CacheEntry {
    /// An "alive" record without a latency is read back as dead.
    pub fn into_outcome(self) -> ProbeOutcome {
        let latency = if self.alive { self.latency_ms } else { None };
        ProbeOutcome::from_latency(latency, self.country, self.time)
    }
}
