//! CLI argument parsing for libra

use crate::report::ReportFormat;
use crate::wavelet::WaveletKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => ReportFormat::Text,
            OutputFormat::Json => ReportFormat::Json,
        }
    }
}

/// Wavelet family
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Haar,
    Cdf97,
}

impl From<KindArg> for WaveletKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Haar => WaveletKind::Haar,
            KindArg::Cdf97 => WaveletKind::Cdf97,
        }
    }
}

/// Thresholding and transform overrides shared by every subcommand
#[derive(clap::Args, Debug, Clone, Default)]
pub struct CompressionArgs {
    /// Keep only the N largest coefficients
    #[arg(long, value_name = "N", conflicts_with = "energy")]
    pub keep: Option<usize>,

    /// Keep coefficients holding at least this fraction of the largest one's energy
    #[arg(long, value_name = "FRACTION")]
    pub energy: Option<f64>,

    /// Wavelet family
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// Transform depth (default: full depth)
    #[arg(long)]
    pub levels: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compress one series and report size and reconstruction error
    Compress {
        /// JSON array of samples
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        compression: CompressionArgs,
    },

    /// Cluster per-rank series over an in-process fleet
    Cluster {
        /// JSON array of {"rank", "path", "series"} rows
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Fleet size; every row's rank must be below it
        #[arg(long, default_value = "1")]
        ranks: usize,

        /// Upper bound on clusters
        #[arg(long)]
        clusters: Option<usize>,

        #[command(flatten)]
        compression: CompressionArgs,
    },

    /// Generate the three-pattern synthetic fleet and cluster it
    Simulate {
        #[arg(long, default_value = "4")]
        ranks: usize,

        #[arg(long, default_value = "64")]
        steps: usize,

        /// Call paths per rank
        #[arg(long, default_value = "3")]
        paths: usize,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Amplitude of the uniform noise
        #[arg(long, default_value = "1.0")]
        noise: f64,

        /// Upper bound on clusters
        #[arg(long)]
        clusters: Option<usize>,

        /// Write times-<ranks> into this directory
        #[arg(long, value_name = "DIR")]
        times_dir: Option<PathBuf>,

        #[command(flatten)]
        compression: CompressionArgs,
    },
}

#[derive(Parser, Debug)]
#[command(name = "libra")]
#[command(version)]
#[command(about = "Effort signatures, wavelet compression and fleet clustering", long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Write the report to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE", global = true)]
    pub output: Option<PathBuf>,

    /// TOML configuration file (EFFORT_* variables override it)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug tracing to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}
