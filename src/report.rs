use std::path::Path;

use anyhow::{Context, Result};

use crate::schema::SCHEMA_FIELDS;
use crate::validate::Report;

pub const REPORT_FILENAME: &str = "invalid_entries.csv";

/// Writes a `Report` as the two-row CSV contract: a header row of field
/// names plus `total_entries`, then one data row of counts.
pub fn write_report_to_dir(report: &Report, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(REPORT_FILENAME);
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("creating report file {}", path.display()))?;

    let mut header: Vec<&str> = SCHEMA_FIELDS.to_vec();
    header.push("total_entries");
    writer.write_record(&header)?;

    let mut values: Vec<String> = SCHEMA_FIELDS
        .iter()
        .map(|f| report.invalid(f).to_string())
        .collect();
    values.push(report.total_entries.to_string());
    writer.write_record(&values)?;
    writer.flush()?;
    Ok(())
}

pub fn read_report_from_dir(dir: &Path) -> Result<Report> {
    let path = dir.join(REPORT_FILENAME);
    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("reading report file {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let record = reader
        .records()
        .next()
        .with_context(|| format!("{} has no data row", path.display()))??;

    let mut invalid_counts = std::collections::HashMap::new();
    let mut total_entries = 0u64;
    for (name, value) in headers.iter().zip(record.iter()) {
        let n: u64 = value.parse().unwrap_or(0);
        if name == "total_entries" {
            total_entries = n;
        } else {
            invalid_counts.insert(name.to_string(), n);
        }
    }
    Ok(Report { invalid_counts, total_entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::default();
        report.invalid_counts.insert("rsID".to_string(), 3);
        report.total_entries = 10;

        write_report_to_dir(&report, dir.path()).unwrap();
        let read_back = read_report_from_dir(dir.path()).unwrap();
        assert_eq!(read_back.invalid("rsID"), 3);
        assert_eq!(read_back.total_entries, 10);
    }
}
