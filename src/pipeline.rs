//! The counting pipeline: aggregate, cluster, geolocate, write.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cluster::{merge_boats, merge_detections};
use crate::config::Config;
use crate::geo::{boats_to_latlong, ImageMeta};
use crate::labels::{read_label_dir, split_by_confidence};
use crate::output::{append_records, BoatRecord};
use crate::types::{Boat, ClassLabel};

/// Capture date parsed from an image stem of the form `yyyymmdd_<aoi>`.
pub fn date_from_stem(stem: &str) -> Option<NaiveDate> {
    let digits = stem.split('_').next()?;
    if digits.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Per-image result, before the cross-image merge.
struct ImageBoats {
    stationary: Vec<Boat>,
    moving: Vec<Boat>,
    /// Whether positions were converted to longitude/latitude.
    geolocated: bool,
}

/// Sequential counting pipeline over a directory of label directories.
pub struct CountPipeline {
    config: Config,
}

impl CountPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the full pipeline and return the path of the output CSV.
    ///
    /// `source` overrides the configured labels directory. Images are
    /// grouped by capture date; each image is clustered on its own with
    /// the pixel cutoffs, then each day's boats are merged across images
    /// with the degree cutoffs.
    pub fn run(&self, source: Option<&Path>) -> Result<PathBuf> {
        let labels_dir = source.unwrap_or(&self.config.labels_dir);
        let out_path = self.config.output_dir.join("boat_detections.csv");

        let days = self.scan_days(labels_dir)?;
        if days.is_empty() {
            warn!("No image label directories found in {}", labels_dir.display());
            return Ok(out_path);
        }

        let n_days = days.len();
        for (i, (date, dirs)) in days.iter().enumerate() {
            match date {
                Some(d) => info!("Classifying day {} of {} - {}", i + 1, n_days, d),
                None => info!("Classifying undated images ({} of {})", i + 1, n_days),
            }
            let boats = self.process_day(dirs)?;
            info!(
                "{} boat(s) counted ({} stationary, {} moving)",
                boats.len(),
                boats.iter().filter(|b| b.class == ClassLabel::Stationary).count(),
                boats.iter().filter(|b| b.class == ClassLabel::Moving).count(),
            );
            let records: Vec<BoatRecord> =
                boats.iter().map(|b| BoatRecord::new(b, *date)).collect();
            append_records(&out_path, &records)?;
        }

        info!("Results written to {}", out_path.display());
        Ok(out_path)
    }

    /// Group image label directories by capture date.
    fn scan_days(&self, labels_dir: &Path) -> Result<BTreeMap<Option<NaiveDate>, Vec<PathBuf>>> {
        let entries = std::fs::read_dir(labels_dir)
            .with_context(|| format!("Failed to read labels directory: {}", labels_dir.display()))?;
        let mut days: BTreeMap<Option<NaiveDate>, Vec<PathBuf>> = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let stem = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let date = date_from_stem(stem);
            if date.is_none() {
                debug!("No date in directory name {:?}", stem);
            }
            days.entry(date).or_default().push(path);
        }
        for dirs in days.values_mut() {
            dirs.sort();
        }
        Ok(days)
    }

    /// Aggregate, cluster and geolocate one image's label directory.
    fn process_image(&self, dir: &Path) -> Result<ImageBoats> {
        let detections = read_label_dir(dir, self.config.tile_size, self.config.stride)?;
        let (kept, low) = split_by_confidence(detections, self.config.confidence_threshold);
        debug!(
            "{}: {} detection(s) kept, {} below confidence {}",
            dir.display(),
            kept.len(),
            low.len(),
            self.config.confidence_threshold
        );

        let (stationary, moving): (Vec<_>, Vec<_>) =
            kept.into_iter().partition(|d| d.class == ClassLabel::Stationary);
        let mut stationary =
            merge_detections(stationary, self.config.pixel_cutoff(ClassLabel::Stationary));
        let mut moving = merge_detections(moving, self.config.pixel_cutoff(ClassLabel::Moving));

        let geolocated = match ImageMeta::load_from_dir(dir)? {
            Some(meta) => {
                boats_to_latlong(&mut stationary, &meta, self.config.tile_size, self.config.stride)?;
                boats_to_latlong(&mut moving, &meta, self.config.tile_size, self.config.stride)?;
                true
            }
            None => {
                warn!(
                    "{}: no metadata.json, keeping pixel coordinates",
                    dir.display()
                );
                false
            }
        };

        Ok(ImageBoats { stationary, moving, geolocated })
    }

    /// Merge one day's images into a single deduplicated boat list.
    fn process_day(&self, dirs: &[PathBuf]) -> Result<Vec<Boat>> {
        let mut images = Vec::with_capacity(dirs.len());
        for dir in dirs {
            images.push(self.process_image(dir)?);
        }

        let geolocated = images.iter().filter(|i| i.geolocated).count();
        let mut stationary: Vec<Boat> =
            images.iter_mut().flat_map(|i| i.stationary.drain(..)).collect();
        let mut moving: Vec<Boat> =
            images.iter_mut().flat_map(|i| i.moving.drain(..)).collect();

        // Overlapping images of the same day see the same vessels, so the
        // day is re-clustered. Degree cutoffs only make sense once every
        // image was geolocated; a mix of pixel and degree positions cannot
        // be merged at all.
        if geolocated == images.len() {
            stationary = merge_boats(
                stationary,
                self.config.latlong_cutoff(ClassLabel::Stationary),
            );
            moving = merge_boats(moving, self.config.latlong_cutoff(ClassLabel::Moving));
        } else if geolocated == 0 {
            stationary =
                merge_boats(stationary, self.config.pixel_cutoff(ClassLabel::Stationary));
            moving = merge_boats(moving, self.config.pixel_cutoff(ClassLabel::Moving));
        } else {
            warn!(
                "{} of {} images geolocated; skipping cross-image merge",
                geolocated,
                images.len()
            );
        }

        stationary.extend(moving);
        Ok(stationary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_date_from_stem() {
        assert_eq!(
            date_from_stem("20230401_peel"),
            NaiveDate::from_ymd_opt(2023, 4, 1)
        );
        assert_eq!(date_from_stem("peel"), None);
        assert_eq!(date_from_stem("2023_peel"), None);
        assert_eq!(date_from_stem("20231340_peel"), None);
    }

    fn test_config(labels: &Path, output: &Path) -> Config {
        Config {
            labels_dir: labels.to_path_buf(),
            output_dir: output.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_run_empty_labels_dir() {
        let labels = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let pipeline = CountPipeline::new(test_config(labels.path(), output.path()));
        let csv = pipeline.run(None).unwrap();
        assert!(!csv.exists());
    }

    #[test]
    fn test_run_counts_duplicates_once() {
        let labels = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let image = labels.path().join("20230401_peel");
        std::fs::create_dir(&image).unwrap();

        // The same boat seen by two overlapping tiles: tile (0,0) at
        // (0.75, 0.25) and tile (0,1) at (0.5, 0.25) both land on global
        // pixel (312, 104).
        write(&image.join("20230401_peel_0_0.txt"), "0 0.75 0.25 0.02 0.02 0.9\n");
        write(&image.join("20230401_peel_0_1.txt"), "0 0.5 0.25 0.02 0.02 0.7\n");
        // A separate moving boat far away in tile (3, 3).
        write(&image.join("20230401_peel_3_3.txt"), "1 0.5 0.5 0.02 0.02 0.8\n");
        // Below the confidence threshold: ignored.
        write(&image.join("20230401_peel_5_5.txt"), "0 0.5 0.5 0.02 0.02 0.2\n");

        let pipeline = CountPipeline::new(test_config(labels.path(), output.path()));
        let csv = pipeline.run(None).unwrap();

        let mut reader = csv::Reader::from_path(&csv).unwrap();
        let rows: Vec<crate::output::BoatRecord> =
            reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.date == "01/04/2023"));

        let stationary = rows.iter().find(|r| r.class == 0).unwrap();
        // Mean of the two duplicate positions, max of their confidences.
        assert_eq!(stationary.longitude, 312.0);
        assert_eq!(stationary.latitude, 104.0);
        assert_eq!(stationary.confidence, 0.9);

        assert!(rows.iter().any(|r| r.class == 1));
    }

    #[test]
    fn test_run_merges_across_images_of_a_day() {
        let labels = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        // Two undated-free images on the same day, no metadata: the day
        // merge falls back to pixel cutoffs and dedups the shared boat.
        for name in ["20230401_peel", "20230401_peel2"] {
            let image = labels.path().join(name);
            std::fs::create_dir(&image).unwrap();
            write(&image.join(format!("{name}_0_0.txt")), "0 0.5 0.5 0.02 0.02 0.9\n");
        }

        let pipeline = CountPipeline::new(test_config(labels.path(), output.path()));
        let csv = pipeline.run(None).unwrap();

        let mut reader = csv::Reader::from_path(&csv).unwrap();
        let rows: Vec<crate::output::BoatRecord> =
            reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        let sources: Vec<&str> = rows[0].images.split(' ').collect();
        assert_eq!(sources, vec!["20230401_peel", "20230401_peel2"]);
    }

    #[test]
    fn test_run_geolocates_with_metadata() {
        let labels = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let image = labels.path().join("20230401_peel");
        std::fs::create_dir(&image).unwrap();

        write(&image.join("20230401_peel_0_0.txt"), "0 0.75 0.75 0.02 0.02 0.9\n");
        // 1040x1040 raster: padding is exactly 312 on every edge, so the
        // detection at padded pixel (312, 312) is raw pixel (0, 0).
        write(
            &image.join("metadata.json"),
            r#"{"width": 1040, "height": 1040, "epsg": 4326,
                "geotransform": [153.0, 0.0001, 0.0, -27.0, 0.0, -0.0001]}"#,
        );

        let pipeline = CountPipeline::new(test_config(labels.path(), output.path()));
        let csv = pipeline.run(None).unwrap();

        let mut reader = csv::Reader::from_path(&csv).unwrap();
        let rows: Vec<crate::output::BoatRecord> =
            reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].longitude - 153.000_05).abs() < 1e-9);
        assert!((rows[0].latitude - -27.000_05).abs() < 1e-9);
    }

    #[test]
    fn test_source_override() {
        let labels = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let image = other.path().join("20230401_peel");
        std::fs::create_dir(&image).unwrap();
        write(&image.join("20230401_peel_0_0.txt"), "0 0.5 0.5 0.02 0.02 0.9\n");

        let pipeline = CountPipeline::new(test_config(labels.path(), output.path()));
        let csv = pipeline.run(Some(other.path())).unwrap();
        assert!(csv.exists());
    }
}
