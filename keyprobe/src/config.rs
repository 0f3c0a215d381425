use anyhow::{Context, Result};
use classify::{BucketRule, Threshold};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "keyprobe.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct CheckConfig {
    pub inputs: Option<Vec<String>>,
    pub out_dir: Option<PathBuf>,
    pub cache_file: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub fetch_timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub qps: Option<u32>,
    pub fresh_secs: Option<u64>,
    pub retention_secs: Option<u64>,
    pub chunk_size: Option<usize>,
    pub collapse_endpoints: Option<bool>,
    pub annotation_suffix: Option<String>,
    pub annotate_country: Option<bool>,
    pub base_url: Option<String>,
    pub exclude: Option<Vec<String>>,
    pub thresholds: Option<Vec<Threshold>>,
    pub slow_label: Option<String>,
    pub buckets: Option<Vec<BucketRule>>,
    pub default_bucket: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub check: Option<CheckConfig>,
}

/// An explicit path must load. Without one, `./keyprobe.yaml` is used when present.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}
