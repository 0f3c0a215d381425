use std::collections::BTreeMap;

use classify::{BucketRules, LatencyClasses};
use keyprobe_core::{ProbeOutcome, UNKNOWN_COUNTRY};

/// An outcome ready for publishing, from the cache or from a fresh probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub identity: String,
    pub source: String,
    /// `host:port`; candidates sharing it may be collapsed.
    pub endpoint_key: String,
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub classes: LatencyClasses,
    pub rules: BucketRules,
    pub collapse_endpoints: bool,
    pub annotate_country: bool,
    pub suffix: Option<String>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            classes: LatencyClasses::default(),
            rules: BucketRules::default(),
            collapse_endpoints: true,
            annotate_country: true,
            suffix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub identity: String,
    pub latency_ms: u64,
    pub label: String,
    /// The annotated descriptor as written to disk.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub lines: Vec<Line>,
}

/// Merges cache hits and fresh results into one line per identity, sorted by
/// latency within each bucket. Dead outcomes are dropped. Every configured
/// bucket is returned, even when empty.
pub fn aggregate(cache_hits: Vec<Candidate>, fresh: Vec<Candidate>, opts: &AggregateOptions) -> Vec<Bucket> {
    // fresh results are inserted last and replace a cached line for the same identity
    let mut by_identity: BTreeMap<String, (Candidate, u64)> = BTreeMap::new();
    for c in cache_hits.into_iter().chain(fresh) {
        if let Some(ms) = c.outcome.latency_ms() {
            by_identity.insert(c.identity.clone(), (c, ms));
        }
    }

    let winners: Vec<(Candidate, u64)> = if opts.collapse_endpoints {
        let mut best: BTreeMap<String, (Candidate, u64)> = BTreeMap::new();
        // identity order makes the earlier entry win latency ties
        for (c, ms) in by_identity.into_values() {
            match best.get(&c.endpoint_key) {
                Some((_, cur)) if *cur <= ms => {}
                _ => {
                    best.insert(c.endpoint_key.clone(), (c, ms));
                }
            }
        }
        best.into_values().collect()
    } else {
        by_identity.into_values().collect()
    };

    let mut buckets: Vec<Bucket> = opts
        .rules
        .names()
        .into_iter()
        .map(|name| Bucket { name: name.to_string(), lines: Vec::new() })
        .collect();
    for (c, ms) in winners {
        let country = c.outcome.country();
        let name = opts.rules.assign(&c.source, country);
        let label = opts.classes.classify(ms).to_string();
        let tag_country = (opts.annotate_country && country != UNKNOWN_COUNTRY).then_some(country);
        let text = annotate(&c.identity, ms, &label, tag_country, opts.suffix.as_deref());
        if let Some(b) = buckets.iter_mut().find(|b| b.name == name) {
            b.lines.push(Line { identity: c.identity, latency_ms: ms, label, text });
        }
    }
    for b in &mut buckets {
        b.lines.sort_by(|x, y| x.latency_ms.cmp(&y.latency_ms).then_with(|| x.identity.cmp(&y.identity)));
    }
    buckets
}

/// `identity#<label>_<latency>ms[_<country>][_<suffix>]`, spaces replaced by `_`.
pub fn annotate(identity: &str, latency_ms: u64, label: &str, country: Option<&str>, suffix: Option<&str>) -> String {
    let mut tag = format!("{label}_{latency_ms}ms");
    for part in [country, suffix].into_iter().flatten().map(str::trim).filter(|p| !p.is_empty()) {
        tag.push('_');
        tag.push_str(part);
    }
    format!("{identity}#{}", tag.replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use classify::BucketRule;

    fn cand(identity: &str, endpoint: &str, ms: Option<u64>, country: &str) -> Candidate {
        Candidate {
            identity: identity.into(),
            source: "keys".into(),
            endpoint_key: endpoint.into(),
            outcome: ProbeOutcome::from_latency(ms, country, 1),
        }
    }

    #[test]
    fn annotation_format() {
        assert_eq!(annotate("ss://x@h:1", 150, "fast", None, None), "ss://x@h:1#fast_150ms");
        assert_eq!(
            annotate("ss://x@h:1", 900, "slow", Some("DE"), Some("@my channel")),
            "ss://x@h:1#slow_900ms_DE_@my_channel"
        );
        assert_eq!(annotate("a", 1, "fast", Some(""), Some("  ")), "a#fast_1ms");
    }

    #[test]
    fn same_endpoint_collapses_to_one_line() {
        let opts = AggregateOptions { annotate_country: false, ..AggregateOptions::default() };
        let buckets = aggregate(
            vec![cand("ss://pw@1.2.3.4:443", "1.2.3.4:443", Some(150), "UNKNOWN")],
            vec![cand("vless://uuid@1.2.3.4:443?security=tls", "1.2.3.4:443", Some(150), "UNKNOWN")],
            &opts,
        );
        assert_eq!(buckets.len(), 1);
        let lines: Vec<_> = buckets[0].lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(lines, vec!["ss://pw@1.2.3.4:443#fast_150ms"]);
    }

    #[test]
    fn without_collapse_both_survive() {
        let opts = AggregateOptions { collapse_endpoints: false, ..AggregateOptions::default() };
        let buckets = aggregate(
            Vec::new(),
            vec![
                cand("vless://u@1.2.3.4:443", "1.2.3.4:443", Some(150), "UNKNOWN"),
                cand("ss://p@1.2.3.4:443", "1.2.3.4:443", Some(120), "UNKNOWN"),
            ],
            &opts,
        );
        let ids: Vec<_> = buckets[0].lines.iter().map(|l| l.identity.as_str()).collect();
        assert_eq!(ids, vec!["ss://p@1.2.3.4:443", "vless://u@1.2.3.4:443"]);
    }

    #[test]
    fn dedups_drops_dead_and_sorts() {
        let buckets = aggregate(
            vec![cand("b", "h2:1", Some(300), "DE"), cand("a", "h1:1", Some(300), "DE")],
            vec![cand("c", "h3:1", None, "DE"), cand("b", "h2:1", Some(50), "DE"), cand("d", "h4:1", Some(900), "UNKNOWN")],
            &AggregateOptions::default(),
        );
        let texts: Vec<_> = buckets[0].lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["b#fast_50ms_DE", "a#normal_300ms_DE", "d#slow_900ms"]);
    }

    #[test]
    fn routes_into_buckets_and_keeps_empty_ones() {
        let rules = BucketRules::new(
            vec![
                BucketRule { name: "ru".into(), countries: vec!["RU".into()], ..BucketRule::default() },
                BucketRule { name: "nl".into(), countries: vec!["NL".into()], ..BucketRule::default() },
            ],
            "all",
        );
        let opts = AggregateOptions { rules, ..AggregateOptions::default() };
        let buckets = aggregate(Vec::new(), vec![cand("x", "h:1", Some(10), "RU"), cand("y", "g:1", Some(10), "FR")], &opts);
        let shape: Vec<_> = buckets.iter().map(|b| (b.name.as_str(), b.lines.len())).collect();
        assert_eq!(shape, vec![("ru", 1), ("nl", 0), ("all", 1)]);
    }
}
