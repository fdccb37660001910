// Session configuration: TOML file plus `EFFORT_*` environment overrides

use crate::cluster::ClusterConfig;
use crate::progress::TIME_METRIC;
use crate::wavelet::{Threshold, WaveletConfig, WaveletKind};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "EFFORT_";

/// Which intervals feed the implicit time column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionMode {
    /// Time between communication calls, charged to the active path
    #[default]
    Effort,
    /// Time inside communication calls, charged to the empty path
    Comm,
    Both,
}

impl RegionMode {
    pub fn tracks_effort(self) -> bool {
        matches!(self, RegionMode::Effort | RegionMode::Both)
    }

    pub fn tracks_comm(self) -> bool {
        matches!(self, RegionMode::Comm | RegionMode::Both)
    }

    /// Parse, falling back to [`RegionMode::Effort`] on unknown input
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(value, "unknown region mode, using effort");
            RegionMode::Effort
        })
    }
}

impl FromStr for RegionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "effort" => Ok(RegionMode::Effort),
            "comm" => Ok(RegionMode::Comm),
            "both" => Ok(RegionMode::Both),
            other => Err(format!("unknown region mode '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for RegionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RegionMode::parse_lenient(&raw))
    }
}

/// Everything an [`EffortSession`](crate::session::EffortSession) needs
///
/// # Example
/// ```
/// use libra_effort::config::{EffortConfig, RegionMode};
///
/// let config = EffortConfig::from_toml_str(r#"
///     metrics = ["flops"]
///     regions = "both"
///
///     [cluster]
///     max_clusters = 4
/// "#).unwrap();
/// assert_eq!(config.regions, RegionMode::Both);
/// assert_eq!(config.cluster.max_clusters, 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffortConfig {
    /// Metric names declared at session start; may be empty and set later
    pub metrics: Vec<String>,
    /// Append the implicit `"time"` column
    pub track_time: bool,
    pub regions: RegionMode,
    pub wavelet: WaveletConfig,
    pub cluster: ClusterConfig,
    /// Metric whose series is compressed and clustered at finalize
    pub cluster_metric: String,
    /// Drop runtime start-up frames above the program entry from stack walks
    pub chop_runtime: bool,
    /// Progress calls folded into one recorded step
    pub sampling: u64,
}

impl Default for EffortConfig {
    fn default() -> Self {
        Self {
            metrics: Vec::new(),
            track_time: true,
            regions: RegionMode::Effort,
            wavelet: WaveletConfig::default(),
            cluster: ClusterConfig::default(),
            cluster_metric: TIME_METRIC.to_string(),
            chop_runtime: true,
            sampling: 1,
        }
    }
}

impl EffortConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse effort configuration")
    }

    /// Read a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Defaults with the process environment applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `EFFORT_*` pairs; other names are ignored
    ///
    /// Booleans are true only for a case-insensitive `"true"`. Malformed
    /// numbers are errors.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "METRICS" => {
                    self.metrics = value
                        .split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect();
                }
                "TRACK_TIME" => self.track_time = parse_bool(value),
                "REGIONS" => self.regions = RegionMode::parse_lenient(value),
                "CLUSTER_METRIC" => self.cluster_metric = value.to_string(),
                "CHOP_RUNTIME" => self.chop_runtime = parse_bool(value),
                "SAMPLING" => self.sampling = parse_number(name, value)?,
                "WAVELET" => {
                    self.wavelet.kind = match value.to_ascii_lowercase().as_str() {
                        "haar" => WaveletKind::Haar,
                        "cdf97" => WaveletKind::Cdf97,
                        other => bail!("Invalid value for {}WAVELET: {}", ENV_PREFIX, other),
                    }
                }
                "LEVELS" => self.wavelet.levels = Some(parse_number(name, value)?),
                "KEEP" => self.wavelet.threshold = Threshold::KeepLargest(parse_number(name, value)?),
                "ENERGY" => {
                    self.wavelet.threshold = Threshold::RelativeEnergy(parse_number(name, value)?)
                }
                "MAX_CLUSTERS" => self.cluster.max_clusters = parse_number(name, value)?,
                "MAX_ITERATIONS" => self.cluster.max_iterations = parse_number(name, value)?,
                "EPSILON" => self.cluster.epsilon = parse_number(name, value)?,
                "MERGE_DISTANCE" => self.cluster.merge_distance = parse_number(name, value)?,
                "MIN_SEPARATION" => self.cluster.min_separation = parse_number(name, value)?,
                _ => tracing::debug!(name, "ignoring unknown effort override"),
            }
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.wavelet.threshold.validate().map_err(|e| e.to_string())?;
        self.cluster.validate()?;

        if self.sampling == 0 {
            return Err("sampling must be at least 1".to_string());
        }
        if self.cluster_metric.is_empty() {
            return Err("cluster_metric must not be empty".to_string());
        }
        let is_time = self.cluster_metric == TIME_METRIC;
        if is_time && !self.track_time && !self.metrics.iter().any(|m| m == TIME_METRIC) {
            return Err("cluster_metric is \"time\" but track_time is disabled".to_string());
        }
        if !is_time
            && !self.metrics.is_empty()
            && !self.metrics.iter().any(|m| *m == self.cluster_metric)
        {
            return Err(format!(
                "cluster_metric '{}' is not one of the declared metrics {:?}",
                self.cluster_metric, self.metrics
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid numeric value for {}{}: {}", ENV_PREFIX, name, value))
}
