use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::box_controller::SplitSettings;
use super::constants::*;
use super::distributed::BuildSettings;
use super::error::ConfigError;
use super::extent::Extent;
use super::frame::OutputFrame;

/// Parameters of the synthetic event source used by the command line tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub n_events: usize,
    pub seed: u64,
    pub n_peaks: usize,
    pub peak_width: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            n_events: 100_000,
            seed: 0,
            n_peaks: 4,
            peak_width: 1.0,
        }
    }
}

/// Structure representing the application configuration. Contains the output space, box
/// splitting policy and worker information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub output_dimensions: OutputFrame,
    /// Flat min,max pairs, one pair per output dimension
    pub extents: Vec<f64>,
    pub split_into: Vec<usize>,
    pub split_threshold: u64,
    pub max_recursion_depth: usize,
    pub min_recursion_depth: usize,
    pub fraction: f64,
    pub n_workers: usize,
    pub comm_timeout_secs: u64,
    pub source: SourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut extents = Vec::with_capacity(DEFAULT_N_DIMS * 2);
        for _ in 0..DEFAULT_N_DIMS {
            extents.push(-DEFAULT_EXTENT);
            extents.push(DEFAULT_EXTENT);
        }
        Self {
            output_dimensions: OutputFrame::default(),
            extents,
            split_into: vec![DEFAULT_SPLIT_INTO],
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            min_recursion_depth: DEFAULT_MIN_RECURSION_DEPTH,
            fraction: DEFAULT_FRACTION,
            n_workers: 1,
            comm_timeout_secs: DEFAULT_COMM_TIMEOUT_SECS,
            source: SourceConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Number of output dimensions, from the extents
    pub fn n_dims(&self) -> usize {
        self.extents.len() / 2
    }

    pub fn is_n_workers_valid(&self) -> bool {
        self.n_workers >= 1
    }

    pub fn split_settings(&self) -> SplitSettings {
        SplitSettings {
            split_into: self.split_into.clone(),
            split_threshold: self.split_threshold,
            max_depth: self.max_recursion_depth,
            min_depth: self.min_recursion_depth,
        }
    }

    /// Settings for an `ND` dimensional build. Fails if the extents do not give exactly
    /// one min and max per dimension, or any other setting is out of range.
    pub fn build_settings<const ND: usize>(&self) -> Result<BuildSettings<ND>, ConfigError> {
        if self.extents.len() % 2 != 0 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "Extents must be given as min,max pairs; found {} values",
                self.extents.len()
            )));
        }
        if !self.source.peak_width.is_finite() {
            return Err(ConfigError::InvalidConfiguration(format!(
                "Source peak width must be finite, found {}",
                self.source.peak_width
            )));
        }
        let settings = BuildSettings {
            extents: Extent::from_flat::<ND>(&self.extents)?,
            split: self.split_settings(),
            fraction: self.fraction,
            frame: self.output_dimensions,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn comm_timeout(&self) -> Duration {
        Duration::from_secs(self.comm_timeout_secs)
    }
}
