//! Reading raw descriptor lines from files, directories and URLs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("fetching {url}: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("fetching {url}: HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Lines from one source, tagged for bucket rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBatch {
    pub tag: String,
    pub lines: Vec<String>,
}

/// Loads every input in order. Failing inputs are logged and skipped; the
/// call only fails when there were inputs and none of them could be read.
pub async fn load_inputs(inputs: &[String], fetch_timeout: Duration) -> Result<Vec<SourceBatch>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    let client = Client::builder()
        .timeout(fetch_timeout)
        .user_agent(format!("keyprobe/{}", keyprobe_core::version()))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .context("building http client")?;

    let mut batches = Vec::new();
    let mut failed = 0usize;
    for input in inputs {
        let loaded = if is_url(input) {
            fetch_url(&client, input).await.map(|b| vec![b])
        } else {
            read_path(Path::new(input))
        };
        match loaded {
            Ok(mut b) => batches.append(&mut b),
            Err(e) => {
                failed += 1;
                warn!(%input, error = %e, "skipping input");
            }
        }
    }
    if failed == inputs.len() {
        bail!("none of the {} inputs could be read", inputs.len());
    }
    let lines: usize = batches.iter().map(|b| b.lines.len()).sum();
    info!(sources = batches.len(), lines, failed, "inputs loaded");
    Ok(batches)
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// A directory expands to its regular, non-hidden files in name order.
pub fn read_path(path: &Path) -> Result<Vec<SourceBatch>, SourceError> {
    let io_err = |source: std::io::Error| SourceError::Io { path: path.to_path_buf(), source };
    let meta = fs::metadata(path).map_err(io_err)?;
    if !meta.is_dir() {
        return read_file(path).map(|b| vec![b]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .map_err(io_err)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| !p.file_name().and_then(|n| n.to_str()).map_or(true, |n| n.starts_with('.')))
        .collect();
    files.sort();
    let mut out = Vec::with_capacity(files.len());
    for f in files {
        match read_file(&f) {
            Ok(b) => out.push(b),
            Err(e) => warn!(error = %e, "skipping file"),
        }
    }
    Ok(out)
}

fn read_file(path: &Path) -> Result<SourceBatch, SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Io { path: path.to_path_buf(), source })?;
    let tag = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file").to_string();
    let lines = decode_payload(&String::from_utf8_lossy(&bytes));
    debug!(path = %path.display(), lines = lines.len(), "read file");
    Ok(SourceBatch { tag, lines })
}

async fn fetch_url(client: &Client, url: &str) -> Result<SourceBatch, SourceError> {
    let http_err = |source: reqwest::Error| SourceError::Http { url: url.to_string(), source };
    let resp = client.get(url).send().await.map_err(http_err)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status { url: url.to_string(), status: status.as_u16() });
    }
    let body = resp.text().await.map_err(http_err)?;
    let lines = decode_payload(&body);
    debug!(%url, lines = lines.len(), "fetched");
    Ok(SourceBatch { tag: url_tag(url), lines })
}

/// Last non-empty path segment without extension, else the host.
pub fn url_tag(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else { return "remote".to_string() };
    let from_path = parsed
        .path_segments()
        .and_then(|mut segs| segs.rfind(|s| !s.is_empty()))
        .and_then(|s| Path::new(s).file_stem().and_then(|f| f.to_str()))
        .map(str::to_string);
    from_path
        .or_else(|| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| "remote".to_string())
}

/// Plain text is split into lines; a body without any `://` is tried as a
/// whole-body base64 subscription payload.
pub fn decode_payload(text: &str) -> Vec<String> {
    let text = text.trim_start_matches('\u{feff}');
    if !text.contains("://") {
        if let Some(decoded) = decode_base64(text) {
            return descriptor_lines(&decoded);
        }
    }
    descriptor_lines(text)
}

fn decode_base64(text: &str) -> Option<String> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    let unpadded = compact.trim_end_matches('=');
    let bytes = STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(unpadded))
        .or_else(|_| URL_SAFE_NO_PAD.decode(unpadded))
        .ok()?;
    let s = String::from_utf8(bytes).ok()?;
    s.contains("://").then_some(s)
}

fn descriptor_lines(text: &str) -> Vec<String> {
    text.lines().map(str::trim).filter(|l| l.contains("://")).map(str::to_string).collect()
}
