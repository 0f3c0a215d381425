//! One checking run: load, parse, reuse or probe, publish, persist the cache.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use classify::country_of;
use descriptor::Descriptor;
use keyprobe_core::ratelimiter::RateLimiter;
use keyprobe_core::{rfc3339, Clock, ProbeOutcome};
use liveness::{run_all, Prober, WorkItem};
use probe_cache::CacheStore;
use publish::{aggregate, write_buckets, AggregateOptions, Candidate, Manifest};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::sources::{self, SourceBatch};

#[derive(Debug, Clone)]
pub struct Settings {
    pub inputs: Vec<String>,
    pub out_dir: PathBuf,
    pub cache_file: PathBuf,
    pub timeout: Duration,
    pub fetch_timeout: Duration,
    pub concurrency: usize,
    /// Probe launches per second, 0 for unpaced.
    pub qps: u32,
    pub freshness: Duration,
    pub retention: Duration,
    pub chunk_size: usize,
    pub exclude: Vec<String>,
    pub base_url: Option<String>,
    pub publish: AggregateOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            inputs: vec!["keys".to_string()],
            out_dir: PathBuf::from("checked"),
            cache_file: PathBuf::from("checked/cache.json"),
            timeout: Duration::from_millis(3000),
            fetch_timeout: Duration::from_secs(15),
            concurrency: 200,
            qps: 0,
            freshness: Duration::from_secs(6 * 3600),
            retention: Duration::from_secs(72 * 3600),
            chunk_size: 500,
            exclude: Vec::new(),
            base_url: None,
            publish: AggregateOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub inputs: usize,
    pub lines: usize,
    pub excluded: usize,
    pub duplicates: usize,
    pub unique: usize,
    pub unparsable: usize,
    pub cached: usize,
    pub probed: usize,
    pub alive: usize,
    pub dead: usize,
    pub written: usize,
    pub evicted: usize,
    pub artifacts: usize,
}

struct Entry {
    descriptor: Descriptor,
    source: String,
}

#[derive(Default)]
struct Collected {
    entries: Vec<Entry>,
    lines: usize,
    excluded: usize,
    duplicates: usize,
}

/// Applies the exclude list and keeps the first occurrence of each identity,
/// in source order then line order.
fn collect(batches: Vec<SourceBatch>, exclude: &[String]) -> Collected {
    let mut out = Collected::default();
    let mut seen: HashSet<String> = HashSet::new();
    for batch in batches {
        for line in batch.lines {
            out.lines += 1;
            let plain = descriptor::unescape_html(&line);
            if exclude.iter().any(|x| !x.is_empty() && plain.contains(x.as_str())) {
                out.excluded += 1;
                continue;
            }
            let Some(descriptor) = Descriptor::from_line(&line) else { continue };
            if !seen.insert(descriptor.identity().to_string()) {
                out.duplicates += 1;
                continue;
            }
            out.entries.push(Entry { descriptor, source: batch.tag.clone() });
        }
    }
    out
}

pub async fn run_check(settings: &Settings, prober: Arc<dyn Prober>, clock: &dyn Clock) -> Result<RunSummary> {
    let started_at = rfc3339(clock.now());
    let batches = sources::load_inputs(&settings.inputs, settings.fetch_timeout).await?;
    let inputs = batches.len();
    let collected = collect(batches, &settings.exclude);
    let mut summary = RunSummary {
        started_at,
        inputs,
        lines: collected.lines,
        excluded: collected.excluded,
        duplicates: collected.duplicates,
        unique: collected.entries.len(),
        ..RunSummary::default()
    };

    let mut cache = CacheStore::load(&settings.cache_file, settings.freshness);
    let now = clock.unix_now();
    let mut hits = Vec::new();
    let mut work = Vec::new();
    let mut endpoint_keys: HashMap<String, String> = HashMap::new();
    for Entry { descriptor, source } in collected.entries {
        let Some(endpoint) = descriptor.endpoint() else {
            summary.unparsable += 1;
            debug!(identity = descriptor.identity(), "no host:port, dropped");
            continue;
        };
        let identity = descriptor.identity().to_string();
        let endpoint_key = endpoint.authority();
        if let Some(cached) = cache.lookup(&identity, now) {
            hits.push(Candidate { identity, source, endpoint_key, outcome: cached.clone() });
            continue;
        }
        let country = country_of(&endpoint.host, descriptor.annotation());
        endpoint_keys.insert(identity.clone(), endpoint_key);
        work.push(WorkItem { identity, endpoint, source, country });
    }
    summary.cached = hits.len();
    summary.probed = work.len();
    info!(unique = summary.unique, cached = summary.cached, to_probe = summary.probed, "starting probes");

    let pacing = (settings.qps > 0).then(|| RateLimiter::new(settings.qps));
    let reports = run_all(work, prober, settings.concurrency, settings.timeout, pacing).await;

    let probed_at = clock.unix_now();
    let mut fresh = Vec::new();
    for report in reports {
        let outcome = ProbeOutcome::from_latency(report.latency_ms, report.country, probed_at);
        cache.record(report.identity.clone(), outcome.clone());
        if outcome.is_alive() {
            summary.alive += 1;
            let endpoint_key = endpoint_keys.remove(&report.identity).unwrap_or_default();
            fresh.push(Candidate { identity: report.identity, source: report.source, endpoint_key, outcome });
        } else {
            summary.dead += 1;
        }
    }

    let buckets = aggregate(hits, fresh, &settings.publish);
    summary.written = buckets.iter().map(|b| b.lines.len()).sum();
    let artifacts = write_buckets(&settings.out_dir, &buckets, settings.chunk_size).context("writing output lists")?;
    summary.artifacts = artifacts.len();
    summary.finished_at = rfc3339(clock.now());
    let manifest = Manifest::new(summary.finished_at.clone(), artifacts, settings.base_url.as_deref());
    manifest.write(&settings.out_dir).context("writing manifest")?;

    summary.evicted = cache.evict_older_than(settings.retention, clock.unix_now());
    if let Err(e) = cache.save(&settings.cache_file) {
        warn!(error = %e, "cache not saved");
    }
    info!(alive = summary.alive, dead = summary.dead, written = summary.written, "run finished");
    Ok(summary)
}
