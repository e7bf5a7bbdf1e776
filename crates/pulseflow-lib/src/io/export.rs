//! Output tables: per-beat PPI records and per-window HRV metrics as
//! delimited text.

use crate::config::Channel;
use crate::metrics::hrv::WindowMetrics;
use crate::ppi::PpiRecord;
use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use std::fs;
use std::path::Path;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Write a channel's PPI table. Folder/Participant columns appear only when
/// at least one record carries the tag.
pub fn write_ppi_csv(path: &Path, channel: Channel, records: &[PpiRecord]) -> Result<()> {
    let has_folder = records.iter().any(|r| r.folder.is_some());
    let has_participant = records.iter().any(|r| r.participant.is_some());

    let file = fs::File::create(path)?;
    let mut writer = WriterBuilder::new().from_writer(file);

    let mut header = vec![
        "Time".to_string(),
        channel.as_str().to_string(),
        "PPG_Peaks".to_string(),
        "Quality".to_string(),
        "PPI".to_string(),
    ];
    if has_folder {
        header.push("Folder".to_string());
    }
    if has_participant {
        header.push("Participant".to_string());
    }
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![
            format_time(record.time),
            record.amplitude.to_string(),
            // Every surviving row was a detected peak.
            "1".to_string(),
            record.quality.to_string(),
            record.ppi_ms.to_string(),
        ];
        if has_folder {
            row.push(record.folder.clone().unwrap_or_default());
        }
        if has_participant {
            row.push(record.participant.clone().unwrap_or_default());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a channel's windowed HRV table.
pub fn write_hrv_csv(path: &Path, windows: &[WindowMetrics]) -> Result<()> {
    let has_folder = windows.iter().any(|w| w.folder.is_some());
    let has_participant = windows.iter().any(|w| w.participant.is_some());

    let file = fs::File::create(path)?;
    let mut writer = WriterBuilder::new().from_writer(file);

    let mut header = vec![
        "MeanNN".to_string(),
        "SDNN".to_string(),
        "RMSSD".to_string(),
        "SDSD".to_string(),
        "CVNN".to_string(),
        "CVSD".to_string(),
        "MedianNN".to_string(),
        "Num_Data_Points".to_string(),
        "Mean_Quality".to_string(),
        "Start_Time".to_string(),
        "End_Time".to_string(),
    ];
    if has_folder {
        header.push("Folder".to_string());
    }
    if has_participant {
        header.push("Participant".to_string());
    }
    writer.write_record(&header)?;

    for window in windows {
        let s = &window.summary;
        let mut row = vec![
            s.mean_nn.to_string(),
            s.sdnn.to_string(),
            s.rmssd.to_string(),
            s.sdsd.to_string(),
            s.cvnn.to_string(),
            s.cvsd.to_string(),
            s.median_nn.to_string(),
            s.num_data_points.to_string(),
            s.mean_quality.to_string(),
            format_time(window.start_time),
            format_time(window.end_time),
        ];
        if has_folder {
            row.push(window.folder.clone().unwrap_or_default());
        }
        if has_participant {
            row.push(window.participant.clone().unwrap_or_default());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::hrv::hrv_summary;
    use chrono::TimeZone;
    use csv::ReaderBuilder;
    use tempfile::tempdir;

    fn record(ms: i64, folder: Option<&str>) -> PpiRecord {
        PpiRecord {
            time: Utc.timestamp_millis_opt(ms).unwrap(),
            amplitude: 0.5,
            quality: 0.9,
            ppi_ms: 800.0,
            folder: folder.map(String::from),
            participant: None,
        }
    }

    #[test]
    fn ppi_table_has_expected_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p0_ppi.csv");
        let records = vec![record(0, None), record(800, None)];
        write_ppi_csv(&path, Channel::P0, &records).unwrap();

        let mut reader = ReaderBuilder::new().from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["Time", "P0", "PPG_Peaks", "Quality", "PPI"]
        );
        assert_eq!(reader.records().count(), 2);
    }

    #[test]
    fn folder_column_appears_when_tagged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p0_ppi.csv");
        let records = vec![record(0, Some("001"))];
        write_ppi_csv(&path, Channel::P0, &records).unwrap();
        let mut reader = ReaderBuilder::new().from_path(&path).unwrap();
        assert!(reader.headers().unwrap().iter().any(|h| h == "Folder"));
    }

    #[test]
    fn hrv_table_round_trips_metric_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p0_hrv.csv");
        let windows = vec![WindowMetrics {
            summary: hrv_summary(&[800.0, 820.0, 780.0], &[1.0, 1.0, 1.0]),
            start_time: Utc.timestamp_millis_opt(0).unwrap(),
            end_time: Utc.timestamp_millis_opt(1600).unwrap(),
            folder: None,
            participant: Some("sub-b".into()),
        }];
        write_hrv_csv(&path, &windows).unwrap();

        let mut reader = ReaderBuilder::new().from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "MeanNN"));
        assert!(headers.iter().any(|h| h == "Participant"));
        assert!(!headers.iter().any(|h| h == "Folder"));
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(0), Some("800"));
        assert_eq!(row.get(7), Some("3"));
    }
}
