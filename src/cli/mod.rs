//! CLI argument parsing and command dispatch

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use loadgen_backends::HttpConfig;
use loadgen_core::{
    InputOptions, LoadConfig, LoadPolicy, ScheduleDistribution, SequenceLengthPolicy,
    SequenceOptions,
};

#[derive(Parser)]
#[command(name = "infer-loadgen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply load to an inference server and report latency and throughput
    Run(RunArgs),
    /// Validate a configuration file and model descriptor
    Validate {
        /// Path to a TOML load configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Path to the model descriptor
        #[arg(short, long)]
        model: PathBuf,
    },
}

/// How load is applied
#[derive(Debug, Clone, PartialEq)]
pub enum LoadMode {
    /// Keep `n` requests in flight
    Concurrency(usize),
    /// Issue requests at a rate
    RequestRate(f64),
    /// Replay a custom intervals file
    Intervals,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Model descriptor (JSON)
    #[arg(short, long)]
    pub model: PathBuf,

    /// Inference server URL; omit to use the synthetic backend
    #[arg(short, long)]
    pub url: Option<String>,

    /// Per-request timeout of the HTTP backend
    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Connection timeout of the HTTP backend
    #[arg(long, default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// Number of concurrent requests
    #[arg(long, conflicts_with_all = ["request_rate", "request_intervals"])]
    pub concurrency: Option<usize>,

    /// Target requests per second
    #[arg(long, conflicts_with = "request_intervals")]
    pub request_rate: Option<f64>,

    /// Space requests with exponentially distributed gaps
    #[arg(long, requires = "request_rate")]
    pub poisson: bool,

    /// File of request gaps, one value in microseconds per line
    #[arg(long)]
    pub request_intervals: Option<PathBuf>,

    /// TOML load configuration; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Batch size of every request
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Upper bound on worker threads
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// One request in flight per worker thread
    #[arg(long)]
    pub sync: bool,

    /// Use the streaming endpoint
    #[arg(long)]
    pub streaming: bool,

    /// Stop after this many requests
    #[arg(long)]
    pub request_count: Option<usize>,

    /// Seed for schedules, sequence lengths and synthetic data
    #[arg(long)]
    pub seed: Option<u64>,

    /// Length of generated strings for BYTES inputs
    #[arg(long, default_value_t = 128)]
    pub string_length: usize,

    /// Fixed string for every BYTES input
    #[arg(long)]
    pub string_data: Option<String>,

    /// Fill numeric inputs with zeros
    #[arg(long)]
    pub zero_input: bool,

    /// User data file or directory (repeatable)
    #[arg(long = "input-data")]
    pub input_data: Vec<PathBuf>,

    /// First sequence id for stateful models
    #[arg(long, default_value_t = 1)]
    pub start_sequence_id: u64,

    /// Number of sequence ids
    #[arg(long, default_value_t = 1024)]
    pub sequence_id_range: u64,

    /// Base sequence length
    #[arg(long, default_value_t = 20)]
    pub sequence_length: usize,

    /// Spread of sequence lengths around the base, in percent (0 = fixed)
    #[arg(long, default_value_t = 20.0)]
    pub sequence_length_variation: f64,

    /// Length of one measurement window
    #[arg(long, default_value_t = 5000)]
    pub measurement_interval_ms: u64,

    /// Number of measurement windows
    #[arg(long, default_value_t = 3)]
    pub measurements: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Read a TOML load configuration, or the defaults when no path is given
pub fn read_config(path: Option<&Path>) -> Result<LoadConfig> {
    let Some(path) = path else {
        return Ok(LoadConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
}

impl RunArgs {
    /// Configuration file values with command-line overrides applied
    pub fn load_config(&self) -> Result<LoadConfig> {
        let mut config = read_config(self.config.as_deref())?;

        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(max_threads) = self.max_threads {
            config.max_threads = max_threads;
        }
        if self.sync {
            config.async_mode = false;
        }
        if self.streaming {
            config.streaming = true;
        }
        if let Some(count) = self.request_count {
            config.request_budget = Some(count);
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        Ok(config)
    }

    /// How load is applied; concurrency 1 when nothing is given
    pub fn load_mode(&self) -> LoadMode {
        if let Some(rate) = self.request_rate {
            LoadMode::RequestRate(rate)
        } else if self.request_intervals.is_some() {
            LoadMode::Intervals
        } else {
            LoadMode::Concurrency(self.concurrency.unwrap_or(1))
        }
    }

    /// Worker pool policy matching the load mode
    pub fn policy(&self) -> LoadPolicy {
        match (&self.request_intervals, self.request_rate) {
            (Some(path), _) => LoadPolicy::CustomInterval { path: path.clone() },
            (None, Some(_)) => LoadPolicy::RequestRate {
                distribution: if self.poisson {
                    ScheduleDistribution::Poisson
                } else {
                    ScheduleDistribution::Constant
                },
            },
            (None, None) => LoadPolicy::Concurrency,
        }
    }

    /// HTTP transport settings
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig::default()
            .with_request_timeout(Duration::from_millis(self.timeout_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }

    /// Options for input preparation
    pub fn input_options(&self) -> InputOptions {
        InputOptions {
            string_length: self.string_length,
            string_data: self.string_data.clone(),
            zero_input: self.zero_input,
            user_data: self.input_data.clone(),
        }
    }

    /// Options for the sequence id pool
    pub fn sequence_options(&self) -> SequenceOptions {
        let policy = if self.sequence_length_variation == 0.0 {
            SequenceLengthPolicy::Fixed
        } else {
            SequenceLengthPolicy::Varied {
                variation_percent: self.sequence_length_variation,
            }
        };
        SequenceOptions::new(
            self.start_sequence_id,
            self.sequence_id_range,
            self.sequence_length,
        )
        .with_length_policy(policy)
    }
}
