//! CSV output of counted boats.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::types::Boat;

/// One row of the `boat_detections.csv` output.
///
/// Column order matches the header
/// `date,class,images,latitude,longitude,confidence,w,h`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatRecord {
    /// `dd/mm/yyyy`, or `unknown` when the source name carries no date.
    pub date: String,
    /// Numeric detector class.
    pub class: u32,
    /// Space-joined source image stems.
    pub images: String,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub w: f64,
    pub h: f64,
}

impl BoatRecord {
    pub fn new(boat: &Boat, date: Option<NaiveDate>) -> Self {
        Self {
            date: match date {
                Some(d) => d.format("%d/%m/%Y").to_string(),
                None => "unknown".to_string(),
            },
            class: boat.class.id(),
            images: boat.sources.clone(),
            latitude: boat.y,
            longitude: boat.x,
            confidence: boat.confidence,
            w: boat.width,
            h: boat.height,
        }
    }
}

/// Append records to a CSV file, writing the header only on creation.
pub fn append_records(path: &Path, records: &[BoatRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    let exists = path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open output file: {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!exists)
        .from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    debug!("Appended {} record(s) to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassLabel;

    fn boat() -> Boat {
        Boat {
            x: 153.1,
            y: -27.4,
            confidence: 0.85,
            class: ClassLabel::Moving,
            width: 9.5,
            height: 4.25,
            sources: "20230401_peel".to_string(),
        }
    }

    #[test]
    fn test_record_maps_axes() {
        let record = BoatRecord::new(&boat(), NaiveDate::from_ymd_opt(2023, 4, 1));
        assert_eq!(record.date, "01/04/2023");
        assert_eq!(record.class, 1);
        // x is longitude, y is latitude.
        assert_eq!(record.longitude, 153.1);
        assert_eq!(record.latitude, -27.4);
    }

    #[test]
    fn test_record_without_date() {
        let record = BoatRecord::new(&boat(), None);
        assert_eq!(record.date, "unknown");
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("boat_detections.csv");
        let record = BoatRecord::new(&boat(), NaiveDate::from_ymd_opt(2023, 4, 1));

        append_records(&path, &[record.clone()]).unwrap();
        append_records(&path, &[record]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,class,images,latitude,longitude,confidence,w,h"
        );
        assert_eq!(lines.clone().count(), 2);
        assert!(lines.all(|l| l.starts_with("01/04/2023,1,")));
    }

    #[test]
    fn test_records_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boat_detections.csv");
        let record = BoatRecord::new(&boat(), NaiveDate::from_ymd_opt(2023, 4, 1));
        append_records(&path, std::slice::from_ref(&record)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let back: Vec<BoatRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(back, vec![record]);
    }
}
