//! YAML run configuration.
//!
//! A single `config.yml` controls paths, tiling parameters, distance
//! cutoffs and which pipeline stages `auto` runs. Loaded once per
//! invocation; command-line arguments take precedence over file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline stages that `auto` mode may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tasks {
    /// Aggregate, cluster and write boat detections.
    pub classify: bool,
    /// Match detections against ground truth and report metrics.
    pub compare: bool,
}

impl Default for Tasks {
    fn default() -> Self {
        Self { classify: true, compare: false }
    }
}

/// Run configuration, deserialized from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one subdirectory of label files per source image.
    pub labels_dir: PathBuf,
    /// Directory the output CSV is written to.
    pub output_dir: PathBuf,
    /// Directory of ground-truth label files, for `compare`.
    pub truth_dir: Option<PathBuf>,

    /// Edge length of the square tiles the detector ran on, in pixels.
    pub tile_size: u32,
    /// Distance between adjacent tile origins, in pixels.
    pub stride: u32,

    /// Detections below this confidence are set aside, not counted.
    pub confidence_threshold: f64,

    /// Same-boat cutoff for stationary vessels, padded-image pixels.
    pub stat_distance_cutoff_pix: f64,
    /// Same-boat cutoff for moving vessels, padded-image pixels.
    pub moving_distance_cutoff_pix: f64,
    /// Same-boat cutoff for stationary vessels across images, degrees.
    pub stat_distance_cutoff_latlong: f64,
    /// Same-boat cutoff for moving vessels across images, degrees.
    pub moving_distance_cutoff_latlong: f64,

    pub tasks: Tasks,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            labels_dir: PathBuf::from("labels"),
            output_dir: PathBuf::from("output"),
            truth_dir: None,
            tile_size: 416,
            stride: 104,
            confidence_threshold: 0.5,
            stat_distance_cutoff_pix: 6.0,
            moving_distance_cutoff_pix: 10.0,
            stat_distance_cutoff_latlong: 0.00025,
            moving_distance_cutoff_latlong: 0.0003,
            tasks: Tasks::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the tiling and threshold invariants.
    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 || self.tile_size == 0 {
            bail!("tile_size and stride must be non-zero");
        }
        if self.tile_size % self.stride != 0 {
            bail!(
                "tile_size ({}) must be divisible by stride ({})",
                self.tile_size,
                self.stride
            );
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        for (name, value) in [
            ("stat_distance_cutoff_pix", self.stat_distance_cutoff_pix),
            ("moving_distance_cutoff_pix", self.moving_distance_cutoff_pix),
            ("stat_distance_cutoff_latlong", self.stat_distance_cutoff_latlong),
            ("moving_distance_cutoff_latlong", self.moving_distance_cutoff_latlong),
        ] {
            if value <= 0.0 {
                bail!("{} must be positive, got {}", name, value);
            }
        }
        Ok(())
    }

    /// Pixel-space cutoff for the given class.
    pub fn pixel_cutoff(&self, class: crate::types::ClassLabel) -> f64 {
        match class {
            crate::types::ClassLabel::Stationary => self.stat_distance_cutoff_pix,
            crate::types::ClassLabel::Moving => self.moving_distance_cutoff_pix,
        }
    }

    /// Degree-space cutoff for the given class.
    pub fn latlong_cutoff(&self, class: crate::types::ClassLabel) -> f64 {
        match class {
            crate::types::ClassLabel::Stationary => self.stat_distance_cutoff_latlong,
            crate::types::ClassLabel::Moving => self.moving_distance_cutoff_latlong,
        }
    }
}
