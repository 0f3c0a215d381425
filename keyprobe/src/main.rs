use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use classify::{BucketRules, LatencyClasses};
use descriptor::Descriptor;
use keyprobe_core::{Clock, SystemClock};
use liveness::NetProber;
use probe_cache::CacheStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod pipeline;
mod sources;

use config::CheckConfig;
use pipeline::{RunSummary, Settings};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

impl OutputFormat {
    fn from_config(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "keyprobe", version, about = "Probe proxy descriptor lists and publish the live ones")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./keyprobe.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Probe every input and write the bucketed lists, manifest and cache
    Check(CheckArgs),
    /// Show how descriptors are parsed, without probing anything
    Parse {
        descriptors: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Inspect or prune the probe cache
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Input file, directory or http(s) URL; repeatable. Default: ./keys
    #[arg(long = "input", short = 'i', value_name = "PATH|URL")]
    inputs: Vec<String>,
    /// Output directory for lists and manifest. Default: ./checked
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Probe cache file. Default: <out_dir>/cache.json
    #[arg(long)]
    cache_file: Option<PathBuf>,
    /// Timeout for a whole probe in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Timeout for fetching one remote source in milliseconds
    #[arg(long)]
    fetch_timeout_ms: Option<u64>,
    /// Max probes in flight
    #[arg(long)]
    concurrency: Option<usize>,
    /// Probe launches per second; 0 disables pacing
    #[arg(long)]
    qps: Option<u32>,
    /// Seconds a successful probe stays reusable
    #[arg(long)]
    fresh_secs: Option<u64>,
    /// Seconds before any cache entry is dropped
    #[arg(long)]
    retention_secs: Option<u64>,
    /// Lines per output file
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Keep every descriptor even when several share host:port
    #[arg(long)]
    no_collapse: bool,
    /// Text appended to every annotation
    #[arg(long)]
    suffix: Option<String>,
    /// Public prefix used for artifact URLs in the manifest
    #[arg(long)]
    base_url: Option<String>,
    /// Drop lines containing this text; repeatable
    #[arg(long)]
    exclude: Vec<String>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
}

#[derive(Debug, Subcommand)]
enum CacheCmd {
    /// Count entries by state
    Stats {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Drop entries older than the retention window
    Prune {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        retention_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let loaded_cfg = config::load_config(cli.config.as_deref())?;
    let check_cfg = loaded_cfg.and_then(|c| c.check).unwrap_or_default();
    match cli.command {
        Commands::Version => {
            println!("keyprobe {} (core {})", env!("CARGO_PKG_VERSION"), keyprobe_core::version());
        }
        Commands::Check(args) => {
            let format = args
                .format
                .or_else(|| check_cfg.format.as_deref().and_then(OutputFormat::from_config))
                .unwrap_or(OutputFormat::Text);
            let settings = resolve_settings(args, check_cfg)?;
            let prober = Arc::new(NetProber::new().context("setting up tls client")?);
            let rt = tokio::runtime::Runtime::new()?;
            let summary = rt.block_on(pipeline::run_check(&settings, prober, &SystemClock))?;
            print_summary(&summary, format)?;
        }
        Commands::Parse { descriptors, format } => {
            for raw in descriptors {
                print_parsed(&raw, format)?;
            }
        }
        Commands::Cache { cmd } => {
            let defaults = resolve_settings(CheckArgs::empty(), check_cfg)?;
            match cmd {
                CacheCmd::Stats { file, format } => {
                    let path = file.unwrap_or(defaults.cache_file);
                    let cache = CacheStore::load(&path, defaults.freshness);
                    let stats = cache.stats(SystemClock.unix_now());
                    match format {
                        OutputFormat::Text => println!(
                            "{} entries={} alive={} dead={} reusable={}",
                            path.display(), stats.total, stats.alive, stats.dead, stats.reusable
                        ),
                        OutputFormat::Json => {
                            let obj = serde_json::json!({ "file": path, "stats": stats });
                            println!("{}", serde_json::to_string(&obj)?);
                        }
                    }
                }
                CacheCmd::Prune { file, retention_secs } => {
                    let path = file.unwrap_or(defaults.cache_file);
                    let retention = retention_secs.map(Duration::from_secs).unwrap_or(defaults.retention);
                    let mut cache = CacheStore::try_load(&path, defaults.freshness)?;
                    let removed = cache.evict_older_than(retention, SystemClock.unix_now());
                    cache.save(&path)?;
                    println!("{} removed={} kept={}", path.display(), removed, cache.len());
                }
            }
        }
    }
    Ok(())
}

impl CheckArgs {
    fn empty() -> Self {
        CheckArgs {
            inputs: Vec::new(),
            out_dir: None,
            cache_file: None,
            timeout_ms: None,
            fetch_timeout_ms: None,
            concurrency: None,
            qps: None,
            fresh_secs: None,
            retention_secs: None,
            chunk_size: None,
            no_collapse: false,
            suffix: None,
            base_url: None,
            exclude: Vec::new(),
            format: None,
        }
    }
}

/// CLI flags win over the config file, which wins over built-in defaults.
fn resolve_settings(args: CheckArgs, cfg: CheckConfig) -> Result<Settings> {
    let d = Settings::default();
    let out_dir = args.out_dir.or(cfg.out_dir).unwrap_or(d.out_dir);
    let cache_file = args.cache_file.or(cfg.cache_file).unwrap_or_else(|| out_dir.join("cache.json"));
    let inputs = if !args.inputs.is_empty() { args.inputs } else { cfg.inputs.unwrap_or(d.inputs) };
    let mut exclude = cfg.exclude.unwrap_or_default();
    exclude.extend(args.exclude);

    let classes = match (cfg.thresholds, cfg.slow_label) {
        (None, None) => LatencyClasses::default(),
        (cuts, top) => LatencyClasses::new(
            cuts.unwrap_or_else(classify::default_thresholds),
            top.unwrap_or_else(|| "slow".to_string()),
        )
        .context("invalid latency classes")?,
    };
    let rules = BucketRules::new(cfg.buckets.unwrap_or_default(), cfg.default_bucket.as_deref().unwrap_or("all"));

    let mut publish = d.publish;
    publish.classes = classes;
    publish.rules = rules;
    publish.collapse_endpoints = !args.no_collapse && cfg.collapse_endpoints.unwrap_or(true);
    publish.annotate_country = cfg.annotate_country.unwrap_or(true);
    publish.suffix = args.suffix.or(cfg.annotation_suffix);

    Ok(Settings {
        inputs,
        out_dir,
        cache_file,
        timeout: args.timeout_ms.or(cfg.timeout_ms).map(Duration::from_millis).unwrap_or(d.timeout),
        fetch_timeout: args.fetch_timeout_ms.or(cfg.fetch_timeout_ms).map(Duration::from_millis).unwrap_or(d.fetch_timeout),
        concurrency: args.concurrency.or(cfg.concurrency).unwrap_or(d.concurrency).max(1),
        qps: args.qps.or(cfg.qps).unwrap_or(d.qps),
        freshness: args.fresh_secs.or(cfg.fresh_secs).map(Duration::from_secs).unwrap_or(d.freshness),
        retention: args.retention_secs.or(cfg.retention_secs).map(Duration::from_secs).unwrap_or(d.retention),
        chunk_size: args.chunk_size.or(cfg.chunk_size).unwrap_or(d.chunk_size).max(1),
        exclude,
        base_url: args.base_url.or(cfg.base_url),
        publish,
    })
}

fn print_summary(s: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!(
                "inputs={} lines={} unique={} excluded={} duplicates={} unparsable={}",
                s.inputs, s.lines, s.unique, s.excluded, s.duplicates, s.unparsable
            );
            println!(
                "cached={} probed={} alive={} dead={} written={} files={} evicted={}",
                s.cached, s.probed, s.alive, s.dead, s.written, s.artifacts, s.evicted
            );
            println!("started={} finished={}", s.started_at, s.finished_at);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(s)?),
    }
    Ok(())
}

fn print_parsed(raw: &str, format: OutputFormat) -> Result<()> {
    let Some(d) = Descriptor::from_line(raw) else {
        eprintln!("skipping blank descriptor");
        return Ok(());
    };
    let parsed = descriptor::try_parse(d.identity());
    let country = match &parsed {
        Ok(ep) => classify::country_of(&ep.host, d.annotation()),
        Err(_) => keyprobe_core::UNKNOWN_COUNTRY.to_string(),
    };
    match (format, parsed) {
        (OutputFormat::Text, Ok(ep)) => println!(
            "{} -> {} {} path={} country={}",
            d.identity(), ep.authority(), ep.transport(), ep.websocket_path, country
        ),
        (OutputFormat::Text, Err(e)) => println!("{} -> unparsable: {}", d.identity(), e),
        (OutputFormat::Json, Ok(ep)) => {
            let obj = serde_json::json!({
                "identity": d.identity(),
                "annotation": d.annotation(),
                "scheme": d.scheme(),
                "host": ep.host,
                "port": ep.port,
                "transport": ep.transport(),
                "path": ep.websocket_path,
                "country": country,
            });
            println!("{}", serde_json::to_string(&obj)?);
        }
        (OutputFormat::Json, Err(e)) => {
            let obj = serde_json::json!({ "identity": d.identity(), "error": e.to_string() });
            println!("{}", serde_json::to_string(&obj)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_beats_config_beats_defaults() {
        let cfg = CheckConfig {
            out_dir: Some("cfg-out".into()),
            timeout_ms: Some(1000),
            fetch_timeout_ms: Some(4000),
            concurrency: Some(50),
            exclude: Some(vec!["a".into()]),
            annotation_suffix: Some("@cfg".into()),
            ..CheckConfig::default()
        };
        let mut args = CheckArgs::empty();
        args.timeout_ms = Some(2000);
        args.exclude = vec!["b".into()];
        args.no_collapse = true;
        let s = resolve_settings(args, cfg).unwrap();
        assert_eq!(s.out_dir, PathBuf::from("cfg-out"));
        assert_eq!(s.cache_file, PathBuf::from("cfg-out").join("cache.json"));
        assert_eq!(s.timeout, Duration::from_millis(2000));
        assert_eq!(s.fetch_timeout, Duration::from_millis(4000));
        assert_eq!(s.concurrency, 50);
        assert_eq!(s.inputs, vec!["keys".to_string()]);
        assert_eq!(s.exclude, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(s.publish.suffix.as_deref(), Some("@cfg"));
        assert!(!s.publish.collapse_endpoints);
        assert_eq!(s.chunk_size, 500);
    }

    #[test]
    fn fetch_timeout_flag_overrides_config() {
        let cfg = CheckConfig { fetch_timeout_ms: Some(4000), ..CheckConfig::default() };
        let mut args = CheckArgs::empty();
        args.fetch_timeout_ms = Some(750);
        let s = resolve_settings(args, cfg).unwrap();
        assert_eq!(s.fetch_timeout, Duration::from_millis(750));
        let s = resolve_settings(CheckArgs::empty(), CheckConfig::default()).unwrap();
        assert_eq!(s.fetch_timeout, Settings::default().fetch_timeout);
    }

    #[test]
    fn bad_thresholds_are_rejected() {
        let cfg = CheckConfig {
            thresholds: Some(vec![
                classify::Threshold { label: "a".into(), below_ms: 5 },
                classify::Threshold { label: "b".into(), below_ms: 5 },
            ]),
            ..CheckConfig::default()
        };
        assert!(resolve_settings(CheckArgs::empty(), cfg).is_err());
    }

    #[test]
    fn cli_parses_check_flags() {
        let cli = Cli::try_parse_from([
            "keyprobe", "check", "-i", "keys", "--input", "https://example.org/x.txt", "--timeout-ms", "900",
            "--fetch-timeout-ms", "2500", "--no-collapse", "--format", "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Check(a) => {
                assert_eq!(a.inputs.len(), 2);
                assert_eq!(a.timeout_ms, Some(900));
                assert_eq!(a.fetch_timeout_ms, Some(2500));
                assert!(a.no_collapse);
                assert_eq!(a.format, Some(OutputFormat::Json));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
