//! Latency labels, country heuristics and output bucket assignment.

mod country;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use country::country_of;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("latency label must not be empty")]
    EmptyLabel,
    #[error("duplicate latency cut point at {0}ms")]
    DuplicateCut(u64),
}

/// One cut point: latencies strictly below `below_ms` get `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub label: String,
    pub below_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyClasses {
    cuts: Vec<Threshold>,
    top: String,
}

/// `fast` below 200ms, `normal` below 800ms.
pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold { label: "fast".into(), below_ms: 200 },
        Threshold { label: "normal".into(), below_ms: 800 },
    ]
}

impl Default for LatencyClasses {
    fn default() -> Self {
        Self { cuts: default_thresholds(), top: "slow".into() }
    }
}

impl LatencyClasses {
    /// Cut points may arrive in any order; they are sorted ascending.
    pub fn new(mut cuts: Vec<Threshold>, top: impl Into<String>) -> Result<Self, ClassifyError> {
        let top = top.into();
        if top.trim().is_empty() || cuts.iter().any(|c| c.label.trim().is_empty()) {
            return Err(ClassifyError::EmptyLabel);
        }
        cuts.sort_by_key(|c| c.below_ms);
        if let Some(w) = cuts.windows(2).find(|w| w[0].below_ms == w[1].below_ms) {
            return Err(ClassifyError::DuplicateCut(w[0].below_ms));
        }
        Ok(Self { cuts, top })
    }

    pub fn classify(&self, latency_ms: u64) -> &str {
        self.cuts
            .iter()
            .find(|c| latency_ms < c.below_ms)
            .map(|c| c.label.as_str())
            .unwrap_or(self.top.as_str())
    }
}

/// Routes results into a named bucket. Empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRule {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
}

impl BucketRule {
    fn matches(&self, source: &str, country: &str) -> bool {
        let hit = |list: &[String], v: &str| list.is_empty() || list.iter().any(|x| x.eq_ignore_ascii_case(v));
        hit(&self.sources, source) && hit(&self.countries, country)
    }
}

#[derive(Debug, Clone)]
pub struct BucketRules {
    rules: Vec<BucketRule>,
    default_bucket: String,
}

impl Default for BucketRules {
    fn default() -> Self {
        Self { rules: Vec::new(), default_bucket: "all".into() }
    }
}

impl BucketRules {
    pub fn new(rules: Vec<BucketRule>, default_bucket: &str) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| BucketRule { name: sanitize_bucket_name(&r.name), ..r })
            .collect();
        Self { rules, default_bucket: sanitize_bucket_name(default_bucket) }
    }

    /// First matching rule wins.
    pub fn assign(&self, source: &str, country: &str) -> &str {
        self.rules
            .iter()
            .find(|r| r.matches(source, country))
            .map(|r| r.name.as_str())
            .unwrap_or(self.default_bucket.as_str())
    }

    /// Every bucket a run may produce, rule order first, without repeats.
    pub fn names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.rules.len() + 1);
        for name in self.rules.iter().map(|r| r.name.as_str()).chain(std::iter::once(self.default_bucket.as_str())) {
            if !out.contains(&name) { out.push(name); }
        }
        out
    }
}

/// Restricts a bucket name to `[A-Za-z0-9_-]` so it is safe as a file stem.
pub fn sanitize_bucket_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "all".to_string() } else { cleaned }
}
