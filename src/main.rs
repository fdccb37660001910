use anyhow::{bail, Context, Result};
use clap::Parser;
use libra_effort::callpath::CallPathId;
use libra_effort::cli::{Cli, Command, CompressionArgs};
use libra_effort::cluster::{cluster_signatures, Collective, LocalFleet, SignatureId};
use libra_effort::config::EffortConfig;
use libra_effort::pack::IdPair;
use libra_effort::report::{write_report, ClusterReport, CompressionReport, ReportFormat};
use libra_effort::simulate::{simulate, SimulationConfig};
use libra_effort::wavelet::{compress, decompress, Signature, Threshold};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// One input row of `libra cluster`
#[derive(Debug, Deserialize)]
struct FleetRow {
    rank: u32,
    path: u32,
    series: Vec<f64>,
}

fn load_config(path: Option<&Path>, compression: &CompressionArgs) -> Result<EffortConfig> {
    let mut config = match path {
        Some(path) => EffortConfig::load(path)?,
        None => EffortConfig::default(),
    };
    config.apply_env()?;

    if let Some(kind) = compression.kind {
        config.wavelet.kind = kind.into();
    }
    if let Some(levels) = compression.levels {
        config.wavelet.levels = Some(levels);
    }
    if let Some(keep) = compression.keep {
        config.wavelet.threshold = Threshold::KeepLargest(keep);
    }
    if let Some(energy) = compression.energy {
        config.wavelet.threshold = Threshold::RelativeEnergy(energy);
    }
    config.wavelet.threshold.validate()?;
    config
        .cluster
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid cluster configuration: {}", e))?;
    Ok(config)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn run_compress(input: &Path, config: &EffortConfig, format: ReportFormat) -> Result<String> {
    let series: Vec<f64> = read_json(input)?;
    let signature = compress(&series, &config.wavelet)?;
    let reconstructed = decompress(&signature);
    CompressionReport::new(&series, &signature, &reconstructed).render(format)
}

fn run_cluster(
    input: &Path,
    ranks: usize,
    config: &EffortConfig,
    format: ReportFormat,
) -> Result<String> {
    if ranks == 0 {
        bail!("--ranks must be at least 1");
    }
    let rows: Vec<FleetRow> = read_json(input)?;
    let mut per_rank: Vec<Vec<IdPair<Signature>>> = (0..ranks).map(|_| Vec::new()).collect();
    for row in rows {
        let slot = per_rank.get_mut(row.rank as usize).with_context(|| {
            format!("Row for rank {} but the fleet has {} ranks", row.rank, ranks)
        })?;
        let signature = compress(&row.series, &config.wavelet)
            .with_context(|| format!("Failed to compress rank {} path {}", row.rank, row.path))?;
        let id = SignatureId::new(row.rank, CallPathId(row.path)).encode();
        slot.push(IdPair::new(signature, id));
    }

    let per_rank = &per_rank;
    let mut results = LocalFleet::run(ranks, |endpoint| {
        cluster_signatures(&endpoint, &per_rank[endpoint.rank()], &config.cluster)
    })?;
    let result = results.swap_remove(0)?;
    ClusterReport::new(&result, ranks).render(format)
}

fn emit(output: Option<&PathBuf>, report: &str) -> Result<()> {
    match output {
        Some(path) => write_report(path, report),
        None => {
            print!("{}", report);
            if !report.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);
    let format: ReportFormat = args.format.into();
    let config_path = args.config.as_deref();

    let report = match &args.command {
        Command::Compress { input, compression } => {
            let config = load_config(config_path, compression)?;
            run_compress(input, &config, format)?
        }
        Command::Cluster {
            input,
            ranks,
            clusters,
            compression,
        } => {
            let mut config = load_config(config_path, compression)?;
            if let Some(k) = clusters {
                config.cluster.max_clusters = *k;
            }
            run_cluster(input, *ranks, &config, format)?
        }
        Command::Simulate {
            ranks,
            steps,
            paths,
            seed,
            noise,
            clusters,
            times_dir,
            compression,
        } => {
            let mut config = load_config(config_path, compression)?;
            if let Some(k) = clusters {
                config.cluster.max_clusters = *k;
            }
            let sim = SimulationConfig {
                ranks: *ranks,
                steps: *steps,
                paths_per_rank: *paths,
                seed: *seed,
                noise: *noise,
                times_dir: times_dir.clone(),
            };
            let outcome = simulate(&sim, &config)?;
            if let Some(path) = &outcome.times_file {
                eprintln!("wrote {}", path.display());
            }
            ClusterReport::new(&outcome.result, *ranks).render(format)?
        }
    };

    emit(args.output.as_ref(), &report)
}
