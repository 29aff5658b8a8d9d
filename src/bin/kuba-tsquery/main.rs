//! Kuba TSQuery command line
//!
//! # CLI Commands
//!
//! - `range` - Run a (calendar-aware) range query against Redis
//! - `buckets` - Print the calendar buckets of a range, without Redis
//! - `check-config` - Validate the configuration file
//!
//! # Configuration
//!
//! Read from `--config`, else the `TSQUERY_CONFIG` environment variable,
//! else `./tsquery.toml` when present, else defaults. `TSQUERY_*`
//! environment variables override file values.

use clap::{Args, Parser, Subcommand};
use kuba_tsquery::aggregation::Aggregation;
use kuba_tsquery::calendar::{self, CalendarUnit};
use kuba_tsquery::config::ApplicationConfig;
use kuba_tsquery::merge::{MergePolicy, Reduction};
use kuba_tsquery::range::{Alignment, RangeRequest};
use kuba_tsquery::redis::util::sanitize_url;
use kuba_tsquery::types::{RangeBound, Samples, TimeRange};
use kuba_tsquery::TimeSeriesClient;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DEFAULT_CONFIG_FILE: &str = "tsquery.toml";

#[derive(Parser)]
#[command(name = "kuba-tsquery")]
#[command(version)]
#[command(about = "Calendar-aware range queries for Redis TimeSeries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides TSQUERY_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a range query
    Range(RangeArgs),

    /// Print calendar buckets for a range
    Buckets {
        /// Range start in milliseconds
        #[arg(long)]
        from: i64,

        /// Range end in milliseconds
        #[arg(long)]
        to: i64,

        /// `month` or `day`
        #[arg(short, long, default_value = "month")]
        unit: String,

        /// IANA timezone (defaults to the configured one)
        #[arg(short, long)]
        timezone: Option<String>,
    },

    /// Validate configuration file
    CheckConfig,
}

#[derive(Args)]
struct RangeArgs {
    /// Series key; repeat to query and merge several series
    #[arg(short, long = "key", required = true)]
    keys: Vec<String>,

    /// Range start: milliseconds or `-`
    #[arg(long, default_value = "-", value_parser = parse_bound, allow_hyphen_values = true)]
    from: RangeBound,

    /// Range end: milliseconds or `+`
    #[arg(long, default_value = "+", value_parser = parse_bound, allow_hyphen_values = true)]
    to: RangeBound,

    /// Aggregation type (avg, sum, max, ...)
    #[arg(short, long, requires = "bucket")]
    aggregation: Option<String>,

    /// Bucket: `month`, `day` or milliseconds
    #[arg(short, long, requires = "aggregation")]
    bucket: Option<String>,

    /// Only these timestamps (comma separated)
    #[arg(long, value_delimiter = ',')]
    filter_ts: Vec<i64>,

    /// Only these sub-ranges, as `start..end`
    #[arg(long, value_parser = parse_time_range)]
    filter_range: Vec<TimeRange>,

    /// Only values within `min,max`
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    filter_value: Vec<f64>,

    /// Maximum rows per sub-query
    #[arg(long)]
    count: Option<u64>,

    /// Alignment: `start`, `end` or milliseconds
    #[arg(long)]
    align: Option<String>,

    /// Descending order
    #[arg(long)]
    reverse: bool,

    /// Report the latest partial bucket of compactions
    #[arg(long)]
    latest: bool,

    /// Drop empty calendar buckets instead of emitting NaN
    #[arg(long)]
    no_empty: bool,

    /// Merge policy when several keys are given
    #[arg(long, default_value = "keep_all")]
    merge: String,

    /// Reduction applied after merging
    #[arg(long)]
    reduce: Option<String>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: String,
}

fn parse_bound(s: &str) -> Result<RangeBound, String> {
    match s {
        "-" => Ok(RangeBound::Earliest),
        "+" => Ok(RangeBound::Latest),
        other => other
            .parse::<i64>()
            .map(RangeBound::At)
            .map_err(|e| format!("'{}' is not a timestamp: {}", other, e)),
    }
}

fn parse_time_range(s: &str) -> Result<TimeRange, String> {
    let (start, end) = s
        .split_once("..")
        .ok_or_else(|| format!("'{}' is not of the form start..end", s))?;
    let start = start.trim().parse::<i64>().map_err(|e| e.to_string())?;
    let end = end.trim().parse::<i64>().map_err(|e| e.to_string())?;
    TimeRange::new(start, end).map_err(|e| e.to_string())
}

/// Resolve and load the configuration file
fn load_config(cli: &Cli) -> kuba_tsquery::Result<ApplicationConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("TSQUERY_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let local = Path::new(DEFAULT_CONFIG_FILE);
            local.exists().then(|| local.to_path_buf())
        });

    match path {
        Some(path) => ApplicationConfig::load_with_env(path),
        None => Ok(ApplicationConfig::from_env()),
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_samples(samples: &Samples, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(samples)?);
        return Ok(());
    }

    for sample in samples.iter() {
        match &sample.value {
            kuba_tsquery::SampleValue::Single(v) => println!("{}\t{}", sample.timestamp, v),
            kuba_tsquery::SampleValue::List(values) => {
                println!("{}\t{:?}", sample.timestamp, values)
            },
            kuba_tsquery::SampleValue::Error(message) => {
                println!("{}\tERROR {}", sample.timestamp, message)
            },
        }
    }
    Ok(())
}

async fn cmd_range(
    config: &ApplicationConfig,
    args: &RangeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if !args.filter_value.is_empty() && args.filter_value.len() != 2 {
        return Err("--filter-value takes exactly min,max".into());
    }

    let aggregation = match (&args.aggregation, &args.bucket) {
        (Some(kind), Some(bucket)) => Some(Aggregation::parse(kind, bucket)?),
        _ => None,
    };
    let align = match &args.align {
        Some(align) => align.parse::<Alignment>()?,
        None => config.default_alignment()?,
    };
    let policy: MergePolicy = args.merge.parse()?;
    let reduction = args.reduce.as_deref().map(str::parse::<Reduction>).transpose()?;

    let requests: Vec<RangeRequest> = args
        .keys
        .iter()
        .map(|key| {
            let mut request = RangeRequest::new(key.clone())
                .start(args.from)
                .end(args.to)
                .align(align)
                .latest(args.latest)
                .include_empty_buckets(config.query.include_empty_buckets && !args.no_empty);
            if let Some(aggregation) = aggregation {
                request = request.aggregation(aggregation);
            }
            if !args.filter_ts.is_empty() {
                request = request.filter_by_ts(args.filter_ts.iter().copied());
            }
            if !args.filter_range.is_empty() {
                request = request.filter_by_ranges(args.filter_range.iter().copied());
            }
            if let [min, max] = args.filter_value.as_slice() {
                request = request.filter_by_value(*min, *max);
            }
            if let Some(count) = args.count {
                request = request.count(count);
            }
            if args.reverse {
                request = request.reverse();
            }
            request
        })
        .collect();

    let client = TimeSeriesClient::connect(config).await?;

    let samples = if requests.len() == 1 {
        let samples = client.range(&requests[0]).await?;
        if reduction.is_some() {
            warn!("--reduce ignored for a single key");
        }
        samples
    } else {
        let mut merged = client.range_merged(&requests, policy).await?;
        if let Some(reduction) = reduction {
            merged.reduce(reduction)?;
        }
        merged
    };

    if samples.has_errors() {
        warn!("{} sub-queries reported errors", samples.errors().len());
    }
    debug!("Pool metrics: {:?}", client.executor().pool().metrics());

    print_samples(&samples, &args.format)
}

fn cmd_buckets(
    config: &ApplicationConfig,
    from: i64,
    to: i64,
    unit: &str,
    timezone: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let unit: CalendarUnit = unit.parse()?;
    let tz = match timezone {
        Some(name) => calendar::parse_timezone(name)?,
        None => config.timezone()?,
    };

    let buckets = calendar::resolve(TimeRange::new(from, to)?, unit, tz)?;
    for bucket in buckets.iter() {
        println!("{}\t{}\t{}", bucket.start, bucket.end, bucket.span_ms());
    }

    debug!("{} {} buckets in {}", buckets.len(), buckets.unit(), tz);
    Ok(())
}

fn cmd_check_config(config: &ApplicationConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Redis Settings:");
    println!("  URL: {}", sanitize_url(&config.redis.url));
    println!("  Pool size: {}", config.redis.pool_size);
    println!("  Command timeout: {} ms", config.redis.command_timeout_ms);
    println!("  TLS: {}", config.redis.tls);
    println!();
    println!("Query Settings:");
    println!("  Timezone: {}", config.query.timezone);
    println!("  Filter chunk size: {}", config.query.filter_chunk_size);
    println!("  Include empty buckets: {}", config.query.include_empty_buckets);
    println!("  Default alignment: {}", config.query.default_alignment);
    println!();
    println!("Log level: {}", config.logging.level);

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_tracing(&config.logging.level);

    match &cli.command {
        Commands::Range(args) => cmd_range(&config, args).await,
        Commands::Buckets {
            from,
            to,
            unit,
            timezone,
        } => cmd_buckets(&config, *from, *to, unit, timezone.as_deref()),
        Commands::CheckConfig => cmd_check_config(&config),
    }
}
