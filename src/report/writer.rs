//! Report output: structured JSON document and flattened CSV table.
//!
//! Both files are written for every run, including runs that produced no
//! results (empty family lists, header-only table).

use super::flatten::{flatten, ReportRow, COLUMNS};
use crate::config::OutputSettings;
use crate::error::AppResult;
use crate::experiment::run_engine::{RunDiagnostic, RunReport};
use crate::measurement::{Family, MeasurementResult, ResultStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Result counts of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Stored results
    pub results: usize,
    /// Error-bearing results
    pub errors: usize,
    /// Run-level diagnostics
    pub diagnostics: usize,
}

/// Machine-readable report with every result grouped by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Time the report was generated
    pub generated_at: DateTime<Utc>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
    /// Counts
    pub summary: ReportSummary,
    /// LTE results in completion order
    pub lte: Vec<MeasurementResult>,
    /// NR5G results in completion order
    pub nr5g: Vec<MeasurementResult>,
    /// Sub-thermal-noise results in completion order
    #[serde(rename = "STN")]
    pub stn: Vec<MeasurementResult>,
    /// Spur-search results in completion order
    pub spur_search: Vec<MeasurementResult>,
    /// Configuration and family-initialisation problems
    pub diagnostics: Vec<RunDiagnostic>,
}

impl StructuredReport {
    /// Build the document for a finished run.
    pub fn from_run(report: &RunReport) -> Self {
        let collect = |family| report.store.by_family(family).cloned().collect::<Vec<_>>();
        Self {
            run_id: report.run_id,
            generated_at: Utc::now(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            summary: ReportSummary {
                results: report.store.len(),
                errors: report.store.error_count(),
                diagnostics: report.diagnostics.len(),
            },
            lte: collect(Family::Lte),
            nr5g: collect(Family::Nr5g),
            stn: collect(Family::SubThermalNoise),
            spur_search: collect(Family::SpurSearch),
            diagnostics: report.diagnostics.clone(),
        }
    }

    /// Results of one family.
    pub fn family(&self, family: Family) -> &[MeasurementResult] {
        match family {
            Family::Lte => &self.lte,
            Family::Nr5g => &self.nr5g,
            Family::SubThermalNoise => &self.stn,
            Family::SpurSearch => &self.spur_search,
        }
    }

    /// Rebuild a store from the document, ordered by sequence id.
    pub fn to_store(&self) -> ResultStore {
        let mut results: Vec<MeasurementResult> = Family::RUN_ORDER
            .iter()
            .flat_map(|f| self.family(*f).iter().cloned())
            .collect();
        results.sort_by_key(|r| r.sequence_id);
        results.into_iter().collect()
    }
}

/// Serialize the structured report as pretty JSON.
pub fn write_json<W: Write>(report: &StructuredReport, writer: W) -> AppResult<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Write the tabular report. The header is always written.
pub fn write_csv<W: Write>(rows: &[ReportRow], writer: W) -> AppResult<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv.write_record(COLUMNS)?;
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Locations of the written report files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    /// Structured report
    pub json: PathBuf,
    /// Tabular report
    pub csv: PathBuf,
}

/// Writes both reports into the configured output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    directory: PathBuf,
    json_file: String,
    csv_file: String,
}

impl ReportWriter {
    /// Writer for the given output settings.
    pub fn new(settings: &OutputSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            json_file: settings.json_file.clone(),
            csv_file: settings.csv_file.clone(),
        }
    }

    /// Override the output directory.
    pub fn with_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Write the structured and the tabular report for `report`.
    pub fn write(&self, report: &RunReport) -> AppResult<ReportPaths> {
        fs::create_dir_all(&self.directory)?;
        let paths = ReportPaths {
            json: self.directory.join(&self.json_file),
            csv: self.directory.join(&self.csv_file),
        };

        let document = StructuredReport::from_run(report);
        let mut json = BufWriter::new(File::create(&paths.json)?);
        write_json(&document, &mut json)?;
        json.flush()?;

        let rows = flatten(&report.store);
        write_csv(&rows, File::create(&paths.csv)?)?;

        info!(
            json = %paths.json.display(),
            csv = %paths.csv.display(),
            rows = rows.len(),
            "Reports written"
        );
        Ok(paths)
    }
}
