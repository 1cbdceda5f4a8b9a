//! Validation of counted boats against ground-truth labels.
//!
//! Ground truth is a directory tree of manual label files in the same
//! format the detector writes, minus the confidence column. Both sides are
//! aggregated and clustered identically, then matched one-to-one by
//! nearest neighbor within the per-class distance cutoff.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cluster::merge_detections;
use crate::config::Config;
use crate::labels::{read_label_dir, split_by_confidence};
use crate::types::{Boat, ClassLabel};

/// Match outcome for one class of boats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Tally {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Sum of matched pair distances, for the mean below.
    #[serde(skip)]
    matched_distance: f64,
}

impl Tally {
    pub fn precision(&self) -> f64 {
        let detections = self.true_positives + self.false_positives;
        if detections == 0 {
            return 0.0;
        }
        self.true_positives as f64 / detections as f64
    }

    pub fn recall(&self) -> f64 {
        let truths = self.true_positives + self.false_negatives;
        if truths == 0 {
            return 0.0;
        }
        self.true_positives as f64 / truths as f64
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            return 0.0;
        }
        2.0 * p * r / (p + r)
    }

    /// Mean distance between matched pairs, 0 when nothing matched.
    pub fn mean_matched_distance(&self) -> f64 {
        if self.true_positives == 0 {
            return 0.0;
        }
        self.matched_distance / self.true_positives as f64
    }

    fn absorb(&mut self, other: &Tally) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.matched_distance += other.matched_distance;
    }
}

/// Full comparison report across both classes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Comparison {
    pub stationary: Tally,
    pub moving: Tally,
    pub overall: Tally,
    /// Derived metrics, populated so the JSON output is self-contained.
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Comparison {
    fn from_tallies(stationary: Tally, moving: Tally) -> Self {
        let mut overall = Tally::default();
        overall.absorb(&stationary);
        overall.absorb(&moving);
        Self {
            stationary,
            moving,
            overall,
            precision: overall.precision(),
            recall: overall.recall(),
            f1: overall.f1(),
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Comparison against ground truth")?;
        for (name, tally) in [
            ("stationary", &self.stationary),
            ("moving", &self.moving),
            ("overall", &self.overall),
        ] {
            writeln!(
                f,
                "  {:<10} tp={:<4} fp={:<4} fn={:<4} precision={:.3} recall={:.3} f1={:.3}",
                name,
                tally.true_positives,
                tally.false_positives,
                tally.false_negatives,
                tally.precision(),
                tally.recall(),
                tally.f1()
            )?;
        }
        write!(
            f,
            "  mean matched distance: {:.2}",
            self.overall.mean_matched_distance()
        )
    }
}

/// Greedily match detections to truths one-to-one by ascending distance.
///
/// Pairs farther apart than `cutoff` never match. Unmatched detections
/// count as false positives, unmatched truths as false negatives.
pub fn match_boats(detections: &[Boat], truths: &[Boat], cutoff: f64) -> Tally {
    let mut pairs = Vec::new();
    for (i, det) in detections.iter().enumerate() {
        for (j, truth) in truths.iter().enumerate() {
            let d = det.distance(truth);
            if d <= cutoff {
                pairs.push((d, i, j));
            }
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut det_used = vec![false; detections.len()];
    let mut truth_used = vec![false; truths.len()];
    let mut tally = Tally::default();
    for (d, i, j) in pairs {
        if det_used[i] || truth_used[j] {
            continue;
        }
        det_used[i] = true;
        truth_used[j] = true;
        tally.true_positives += 1;
        tally.matched_distance += d;
    }
    tally.false_positives = det_used.iter().filter(|&&used| !used).count();
    tally.false_negatives = truth_used.iter().filter(|&&used| !used).count();
    tally
}

/// Aggregate and cluster one image's label directory into boats.
///
/// `threshold` is `None` for ground truth, which is taken as given.
fn load_boats(
    dir: &Path,
    config: &Config,
    threshold: Option<f64>,
) -> Result<(Vec<Boat>, Vec<Boat>)> {
    let detections = read_label_dir(dir, config.tile_size, config.stride)?;
    let detections = match threshold {
        Some(t) => {
            let (kept, low) = split_by_confidence(detections, t);
            debug!("{}: {} low-confidence detection(s) set aside", dir.display(), low.len());
            kept
        }
        None => detections,
    };
    let (stationary, moving) = detections
        .into_iter()
        .partition(|d| d.class == ClassLabel::Stationary);
    Ok((
        merge_detections(stationary, config.pixel_cutoff(ClassLabel::Stationary)),
        merge_detections(moving, config.pixel_cutoff(ClassLabel::Moving)),
    ))
}

/// Image label directories under `root`: either `root` itself when it
/// holds label files directly, or its subdirectories.
fn image_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read directory: {}", root.display()))?;
    let mut dirs = Vec::new();
    let mut has_files = false;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        } else if path.extension().and_then(|e| e.to_str()) == Some("txt") {
            has_files = true;
        }
    }
    if dirs.is_empty() && has_files {
        dirs.push(root.to_path_buf());
    }
    dirs.sort();
    Ok(dirs)
}

/// Compare detector output against ground truth, image by image.
///
/// Directories are paired by name: `<labels>/<image>` against
/// `<truth>/<image>`. Matching runs in padded-image pixel space with the
/// per-class pixel cutoffs.
pub fn compare_dirs(config: &Config, labels_dir: &Path, truth_dir: &Path) -> Result<Comparison> {
    let mut stationary = Tally::default();
    let mut moving = Tally::default();
    let mut compared = 0usize;

    for dir in image_dirs(labels_dir)? {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Bad directory name: {}", dir.display()))?;
        let truth = if dir == labels_dir {
            truth_dir.to_path_buf()
        } else {
            truth_dir.join(name)
        };
        if !truth.is_dir() {
            debug!("No ground truth for {}, skipping", name);
            continue;
        }

        let (det_stat, det_moving) = load_boats(&dir, config, Some(config.confidence_threshold))?;
        let (truth_stat, truth_moving) = load_boats(&truth, config, None)?;

        stationary.absorb(&match_boats(
            &det_stat,
            &truth_stat,
            config.pixel_cutoff(ClassLabel::Stationary),
        ));
        moving.absorb(&match_boats(
            &det_moving,
            &truth_moving,
            config.pixel_cutoff(ClassLabel::Moving),
        ));
        compared += 1;
    }

    if compared == 0 {
        bail!(
            "No image directories in {} have ground truth in {}",
            labels_dir.display(),
            truth_dir.display()
        );
    }
    info!("Compared {} image(s) against ground truth", compared);
    Ok(Comparison::from_tallies(stationary, moving))
}
