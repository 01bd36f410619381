//! CSV export of the newest report per resort.
//!
//! Reads only through [`ReportStore::latest`]; resort metadata comes from the
//! registry.

use crate::models::SnowReport;
use crate::registry::ResortRegistry;
use crate::storage::ReportStore;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Resort Name")]
    name: &'a str,
    #[serde(rename = "Country")]
    country: Option<&'a str>,
    #[serde(rename = "Region")]
    region: Option<&'a str>,
    #[serde(rename = "Base Elevation (m)")]
    base_elevation_m: Option<i32>,
    #[serde(rename = "Summit Elevation (m)")]
    summit_elevation_m: Option<i32>,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Base Depth (cm)")]
    base_depth_cm: Option<i32>,
    #[serde(rename = "Summit Depth (cm)")]
    summit_depth_cm: Option<i32>,
    #[serde(rename = "24h Snow (cm)")]
    new_snow_24h_cm: Option<i32>,
    #[serde(rename = "48h Snow (cm)")]
    new_snow_48h_cm: Option<i32>,
    #[serde(rename = "7-Day Snow (cm)")]
    new_snow_7d_cm: Option<i32>,
    #[serde(rename = "Season Total (cm)")]
    season_total_cm: Option<i32>,
    #[serde(rename = "Lifts Open")]
    lifts_open: Option<i32>,
    #[serde(rename = "Total Lifts")]
    lifts_total: Option<i32>,
    #[serde(rename = "Runs Open")]
    runs_open: Option<i32>,
    #[serde(rename = "Total Runs")]
    runs_total: Option<i32>,
    #[serde(rename = "Temperature (°C)")]
    temperature_base_c: Option<f64>,
    #[serde(rename = "Conditions")]
    snow_condition: Option<&'a str>,
    #[serde(rename = "Scraped At")]
    scraped_at: NaiveDateTime,
}

impl<'a> ExportRow<'a> {
    fn new(report: &'a SnowReport, registry: &'a ResortRegistry) -> Self {
        let meta = registry.get(&report.resort);
        let f = &report.fields;
        Self {
            name: &report.resort,
            country: meta.map(|r| r.country.as_str()),
            region: meta.and_then(|r| r.region.as_deref()),
            base_elevation_m: meta.and_then(|r| r.base_elevation_m),
            summit_elevation_m: meta.and_then(|r| r.summit_elevation_m),
            date: report.date,
            base_depth_cm: f.base_depth_cm,
            summit_depth_cm: f.summit_depth_cm,
            new_snow_24h_cm: f.new_snow_24h_cm,
            new_snow_48h_cm: f.new_snow_48h_cm,
            new_snow_7d_cm: f.new_snow_7d_cm,
            season_total_cm: f.season_total_cm,
            lifts_open: f.lifts_open,
            lifts_total: f.lifts_total,
            runs_open: f.runs_open,
            runs_total: f.runs_total,
            temperature_base_c: f.temperature_base_c,
            snow_condition: f.snow_condition.as_deref(),
            scraped_at: report.scraped_at,
        }
    }
}

/// Write the latest report per resort as CSV, ordered by country then name.
/// Returns the number of data rows written.
pub fn write_latest<W: Write>(
    store: &dyn ReportStore,
    registry: &ResortRegistry,
    out: W,
) -> Result<usize> {
    let reports = store.latest(None).context("Failed to read latest reports")?;

    let mut rows: Vec<ExportRow<'_>> = reports
        .iter()
        .map(|r| ExportRow::new(r, registry))
        .collect();
    rows.sort_by(|a, b| (a.country, a.name).cmp(&(b.country, b.name)));

    let mut writer = csv::Writer::from_writer(out);
    for row in &rows {
        writer.serialize(row).context("Failed to write CSV row")?;
    }
    writer.flush().context("Failed to flush CSV")?;
    Ok(rows.len())
}

pub fn export_latest(store: &dyn ReportStore, registry: &ResortRegistry, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    let n = write_latest(store, registry, file)?;
    info!("Exported {} resort(s) to {:?}", n, path);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartialSnowReport;
    use crate::registry::resort;
    use crate::storage::Repository;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, d).unwrap()
    }

    #[test]
    fn test_write_latest_one_row_per_resort() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        let registry = ResortRegistry::new(vec![
            resort("Zermatt", "Switzerland", None),
            resort("Alta", "USA", None),
        ])
        .unwrap();

        let report = |cm| PartialSnowReport {
            base_depth_cm: Some(cm),
            lifts_open: Some(4),
            lifts_total: Some(10),
            ..Default::default()
        };
        let at = |d| date(d).and_hms_opt(7, 0, 0).unwrap();
        repo.upsert("Alta", date(1), &report(100), at(1)).unwrap();
        repo.upsert("Alta", date(2), &report(110), at(2)).unwrap();
        repo.upsert("Zermatt", date(2), &report(80), at(2)).unwrap();

        let mut buf = Vec::new();
        let n = write_latest(&repo, &registry, &mut buf).unwrap();
        assert_eq!(n, 2);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Resort Name,Country,Region"));
        assert!(lines[1].starts_with("Zermatt,Switzerland,,,,2025-02-02,80,"));
        assert!(lines[2].starts_with("Alta,USA,,,,2025-02-02,110,"));
    }

    #[test]
    fn test_export_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("latest.csv");
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let n = export_latest(&repo, &ResortRegistry::default(), &path).unwrap();
        assert_eq!(n, 0);
        assert!(path.exists());
    }
}
