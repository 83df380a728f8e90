//! Export of layer contents and batch reports.
//!
//! - **CSV**: one series (any layer) or a joined panel, for spreadsheets and
//!   external analysis tools
//! - **JSON**: the per-unit batch report

use std::path::Path;

use anyhow::{Context, Result};
use econflow_core::domain::IndicatorRecord;
use econflow_core::transform::{Cell, JoinedPanel};
use serde::Serialize;

use crate::summary::{BatchReport, BatchSummary, UnitReport};

// ─── CSV export ─────────────────────────────────────────────────────

/// Records as CSV. Pending values and absent metrics are empty cells.
///
/// Columns: source, indicator, reference_date, value, unit, layer,
/// collected_at, pct_change, yoy_change, rolling_mean, rolling_variance
pub fn export_records_csv(records: &[IndicatorRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "source",
        "indicator",
        "reference_date",
        "value",
        "unit",
        "layer",
        "collected_at",
        "pct_change",
        "yoy_change",
        "rolling_mean",
        "rolling_variance",
    ])?;

    for r in records {
        wtr.write_record([
            r.source.as_str(),
            r.indicator_code.as_str(),
            r.reference_date.to_string().as_str(),
            opt(r.value).as_str(),
            r.unit.as_str(),
            r.layer.as_str(),
            r.collected_at.to_rfc3339().as_str(),
            opt(r.derived.pct_change).as_str(),
            opt(r.derived.yoy_change).as_str(),
            opt(r.derived.rolling_mean).as_str(),
            opt(r.derived.rolling_variance).as_str(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// A joined panel as a wide CSV: one date column, one column per series,
/// then the derived columns.
///
/// Missing cells are empty, pending cells read `pending`.
pub fn export_panel_csv(panel: &JoinedPanel) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["reference_date".to_string()];
    header.extend(panel.columns.iter().map(ToString::to_string));
    header.extend(panel.derived.iter().map(|c| c.name.clone()));
    wtr.write_record(&header)?;

    let columns: Vec<&[Cell]> = panel
        .cells
        .iter()
        .map(Vec::as_slice)
        .chain(panel.derived.iter().map(|c| c.cells.as_slice()))
        .collect();
    for (row, date) in panel.dates.iter().enumerate() {
        let mut line = vec![date.to_string()];
        for column in &columns {
            line.push(match column.get(row) {
                Some(Cell::Observed(v)) | Some(Cell::Interpolated(v)) => v.to_string(),
                Some(Cell::Pending) => "pending".to_string(),
                Some(Cell::Missing) | None => String::new(),
            });
        }
        wtr.write_record(&line)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

// ─── JSON export ────────────────────────────────────────────────────

#[derive(Serialize)]
struct ReportDocument<'a> {
    summary: BatchSummary,
    units: &'a [UnitReport],
    rejected_requests: Vec<RejectedRequestLine<'a>>,
}

#[derive(Serialize)]
struct RejectedRequestLine<'a> {
    index: usize,
    source: &'a str,
    error: String,
}

/// Batch report as pretty JSON.
pub fn export_report_json(report: &BatchReport) -> Result<String> {
    let doc = ReportDocument {
        summary: report.summary(),
        units: &report.units,
        rejected_requests: report
            .rejected_requests
            .iter()
            .map(|r| RejectedRequestLine {
                index: r.index,
                source: &r.source,
                error: r.error.to_string(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize batch report to JSON")
}

/// Write `contents` to `path`, creating parent directories.
pub fn save(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use econflow_core::domain::{SourceId, Unit};
    use econflow_core::transform::{DerivedColumn, SeriesId};

    fn d(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, 1).unwrap()
    }

    #[test]
    fn records_csv_leaves_pending_empty() {
        let ts = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        let records = vec![
            IndicatorRecord::raw(SourceId::Bcb, "ipca", d(1), Some(0.42), Unit::Percent, ts),
            IndicatorRecord::raw(SourceId::Bcb, "ipca", d(2), None, Unit::Percent, ts),
        ];
        let csv = export_records_csv(&records).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("source,indicator,reference_date,value"));
        assert!(lines[1].starts_with("bcb,ipca,2024-01-01,0.42,percent,raw,"));
        assert!(lines[2].starts_with("bcb,ipca,2024-02-01,,percent,raw,"));
        assert!(lines[2].ends_with(",,,"));
    }

    #[test]
    fn panel_csv_is_wide() {
        let panel = JoinedPanel {
            dates: vec![d(1), d(2)],
            columns: vec![
                SeriesId {
                    source: SourceId::Bcb,
                    indicator_code: "selic".into(),
                },
                SeriesId {
                    source: SourceId::Ibge,
                    indicator_code: "inpc".into(),
                },
            ],
            cells: vec![
                vec![Cell::Observed(5.0), Cell::Pending],
                vec![Cell::Missing, Cell::Interpolated(0.5)],
            ],
            derived: vec![DerivedColumn {
                name: "spread".into(),
                cells: vec![Cell::Missing, Cell::Pending],
            }],
        };
        let csv = export_panel_csv(&panel).unwrap();
        assert_eq!(
            csv,
            "reference_date,bcb.selic,ibge.inpc,spread\n2024-01-01,5,,\n2024-02-01,pending,0.5,pending\n"
        );
    }

    #[test]
    fn report_json_carries_summary() {
        let report = BatchReport {
            units: vec![UnitReport::new(SourceId::Bcb, "ipca")],
            ..BatchReport::default()
        };
        let json = export_report_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["total"], 1);
        assert_eq!(value["summary"]["not_started"], 1);
        assert_eq!(value["units"][0]["state"]["state"], "pending");
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/file.csv");
        save(&path, "a,b\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n");
    }
}
