//! Reading detector label files and mapping them back to the source image.
//!
//! The detector runs over square tiles cut from a padded source image and
//! writes one text file per tile, named `<stem>_<row>_<col>.txt`. Each line
//! is `class x y w h [conf]` with coordinates normalized to the tile. This
//! module reconstructs global pixel coordinates from the tile indices.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, warn};

use crate::types::{ClassLabel, Detection, TilePos};

/// Tile indices parsed from a label file name.
///
/// Returns `None` when the name does not end in `_<row>_<col>`.
pub fn tile_pos_from_name(stem: &str) -> Option<(String, TilePos)> {
    let mut parts = stem.rsplitn(3, '_');
    let col: u32 = parts.next()?.parse().ok()?;
    let row: u32 = parts.next()?.parse().ok()?;
    let image = parts.next()?.to_string();
    if image.is_empty() {
        return None;
    }
    Some((image, TilePos { row, col }))
}

/// Parse one label file into detections in global pixel coordinates.
///
/// A line with five fields is a manual label without a confidence column
/// and is read with confidence 1.0.
pub fn parse_label_file(
    path: &Path,
    tile_size: u32,
    stride: u32,
) -> Result<Vec<Detection>> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Bad label file name: {}", path.display()))?;
    let Some((image, tile)) = tile_pos_from_name(stem) else {
        bail!("Label file name carries no tile indices: {}", path.display());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read label file: {}", path.display()))?;

    let (across, down) = tile.offset(stride);
    let size = f64::from(tile_size);
    let mut detections = Vec::new();

    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 && fields.len() != 6 {
            bail!(
                "{}:{}: expected 5 or 6 fields, got {}",
                path.display(),
                lineno + 1,
                fields.len()
            );
        }
        let parse = |s: &str| -> Result<f64> {
            s.parse::<f64>()
                .with_context(|| format!("{}:{}: bad number {:?}", path.display(), lineno + 1, s))
        };
        let class_id = fields[0]
            .parse::<u32>()
            .with_context(|| format!("{}:{}: bad class id", path.display(), lineno + 1))?;
        let Some(class) = ClassLabel::from_id(class_id) else {
            warn!("{}:{}: unknown class {}, skipping", path.display(), lineno + 1, class_id);
            continue;
        };
        let confidence = if fields.len() == 6 { parse(fields[5])? } else { 1.0 };

        detections.push(Detection {
            x: parse(fields[1])? * size + across,
            y: parse(fields[2])? * size + down,
            confidence,
            class,
            width: parse(fields[3])? * size,
            height: parse(fields[4])? * size,
            source: image.clone(),
        });
    }

    Ok(detections)
}

/// Read every label file in a directory into one detection list.
///
/// Files without tile indices in their name (such as metadata sidecars)
/// are skipped.
pub fn read_label_dir(dir: &Path, tile_size: u32, stride: u32) -> Result<Vec<Detection>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read label directory: {}", dir.display()))?;

    let mut detections = Vec::new();
    let mut files = 0usize;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if tile_pos_from_name(stem).is_none() {
            debug!("Skipping non-tile file: {}", path.display());
            continue;
        }
        detections.extend(parse_label_file(&path, tile_size, stride)?);
        files += 1;
    }

    debug!(
        "Read {} detection(s) from {} label file(s) in {}",
        detections.len(),
        files,
        dir.display()
    );
    Ok(detections)
}

/// Split detections at a confidence threshold.
///
/// Returns `(kept, low_confidence)`.
pub fn split_by_confidence(
    detections: Vec<Detection>,
    threshold: f64,
) -> (Vec<Detection>, Vec<Detection>) {
    detections
        .into_iter()
        .partition(|d| d.confidence >= threshold)
}
