//! Integration tests for report generation
//!
//! Runs plans on the mock bench and checks the flattened table and the
//! structured document written to disk.

use rf_sweep::config::{OutputSettings, SweepSettings};
use rf_sweep::experiment::run_engine::{RunEngine, RunReport};
use rf_sweep::experiment::spec::TestPlanDocument;
use rf_sweep::hardware::mock::{MockBench, MockOperation};
use rf_sweep::measurement::{Family, MeasurementResult, Spur};
use rf_sweep::report::{flatten, ReportWriter, StructuredReport, COLUMNS, NO_SPURS_DETECTED};
use serde_json::json;
use std::fs;
use std::sync::Arc;

async fn run(bench: &MockBench, value: serde_json::Value) -> RunReport {
    let doc: TestPlanDocument = serde_json::from_value(value).unwrap();
    RunEngine::new(Arc::new(bench.clone()), SweepSettings::default())
        .run(&doc)
        .await
}

#[tokio::test(start_paused = true)]
async fn spur_rows_follow_detected_spurs() {
    let bench = MockBench::new();
    bench
        .set_spurs(
            6.0e9,
            vec![
                Spur { frequency_hz: 3.25e9, power_dbm: -96.1 },
                Spur { frequency_hz: 7.5e9, power_dbm: -97.4 },
                Spur { frequency_hz: 11.9e9, power_dbm: -95.2 },
            ],
        )
        .await;
    let report = run(
        &bench,
        json!({"spur_search": [{"run": true, "fundamental_frequency_ghz": [6.0, 6.5]}]}),
    )
    .await;

    let rows = flatten(&report.store);
    // 3 spur rows + 1 clean row + totals
    assert_eq!(rows.len(), 5);

    let dirty = &rows[0..3];
    assert!(dirty.iter().all(|r| r.test_set == "0"));
    assert!(dirty[0].total_test_time_s.is_some());
    assert!(dirty[0].config_summary.is_some());
    for row in &dirty[1..] {
        assert!(row.total_test_time_s.is_none());
        assert!(row.config_summary.is_none());
        assert!(row.spur_frequency_mhz.is_some());
    }
    assert_eq!(dirty[1].spur_frequency_mhz, Some(7500.0));

    let clean = &rows[3];
    assert_eq!(clean.test_set, "1");
    assert_eq!(clean.error.as_deref(), Some(NO_SPURS_DETECTED));
    assert!(clean.spur_frequency_mhz.is_none());
    assert!(clean.spur_power_dbm.is_none());

    let clean_result = report.store.iter().nth(1).unwrap();
    assert!(clean_result.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn totals_row_sums_per_row_test_time() {
    let bench = MockBench::new();
    bench
        .set_spurs(6.0e9, vec![Spur { frequency_hz: 9.0e9, power_dbm: -90.0 }; 2])
        .await;
    let report = run(&bench, serde_json::to_value(TestPlanDocument::builtin()).unwrap()).await;

    let rows = flatten(&report.store);
    let (total, body) = rows.split_last().unwrap();
    assert_eq!(total.test_set, "Total");
    assert_eq!(total.config_summary.as_deref(), Some("N/A"));

    let expected: f64 = body.iter().filter_map(|r| r.total_test_time_s).sum();
    let got = total.total_test_time_s.unwrap();
    assert!((got - expected).abs() < 1e-12);
    assert!(got > 0.0);

    // one LTE row, three STN rows, two spur rows
    assert_eq!(body.len(), 6);
    assert_eq!(body.iter().filter(|r| r.family == "STN").count(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_unit_produces_single_error_row() {
    let bench = MockBench::new();
    bench.fail(MockOperation::Spurs).await;
    let report = run(
        &bench,
        json!({"spur_search": [{"run": true, "fundamental_frequency_ghz": 6.0}]}),
    )
    .await;

    let rows = flatten(&report.store);
    assert_eq!(rows.len(), 2);
    let row = &rows[0];
    assert!(row.error.as_deref().unwrap_or_default().contains("Spurs"));
    assert_ne!(row.error.as_deref(), Some(NO_SPURS_DETECTED));
    assert!(row.spur_frequency_mhz.is_none());
}

#[tokio::test(start_paused = true)]
async fn structured_report_round_trips() {
    let bench = MockBench::new();
    bench.fail_at(MockOperation::Aclr, 6.1e9).await;
    let report = run(
        &bench,
        json!({
            "lte": [{"run": true, "center_frequency_ghz": [6.0, 6.1], "power_dbm": [-10, -7.5]}],
            "nr5g": [{"run": true, "center_frequency_ghz": 3.55, "measure_aclr": false}],
            "STN": [{"run": true, "center_frequency_ghz": 6.321, "iterations": 3}],
            "spur_search": [{"run": true, "fundamental_frequency_ghz": 6.0}]
        }),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let paths = ReportWriter::new(&OutputSettings::default())
        .with_directory(dir.path())
        .write(&report)
        .unwrap();

    let text = fs::read_to_string(&paths.json).unwrap();
    let parsed: StructuredReport = serde_json::from_str(&text).unwrap();

    assert_eq!(parsed.run_id, report.run_id);
    assert_eq!(parsed.summary.results, report.store.len());
    assert_eq!(parsed.summary.errors, 2);
    assert_eq!(parsed.family(Family::Lte).len(), 4);

    let restored = parsed.to_store();
    let original: Vec<&MeasurementResult> = report.store.iter().collect();
    let restored: Vec<&MeasurementResult> = restored.iter().collect();
    assert_eq!(original, restored);
}

#[tokio::test(start_paused = true)]
async fn empty_run_still_writes_both_reports() {
    let bench = MockBench::new();
    let report = run(
        &bench,
        json!({"lte": [{"run": false, "center_frequency_ghz": 6.0}]}),
    )
    .await;
    assert!(report.store.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let paths = ReportWriter::new(&OutputSettings::default())
        .with_directory(dir.path().join("nested"))
        .write(&report)
        .unwrap();

    let mut reader = csv::Reader::from_path(&paths.csv).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header, COLUMNS);
    assert_eq!(reader.records().count(), 0);

    let parsed: StructuredReport =
        serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
    assert_eq!(parsed.summary.results, 0);
    assert!(parsed.stn.is_empty());
}

#[tokio::test(start_paused = true)]
async fn csv_formats_frequencies_with_three_decimals() {
    let bench = MockBench::new();
    let report = run(
        &bench,
        json!({"STN": [{"run": true, "center_frequency_ghz": 6.3216, "iterations": 1}]}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let paths = ReportWriter::new(&OutputSettings::default())
        .with_directory(dir.path())
        .write(&report)
        .unwrap();

    let mut reader = csv::Reader::from_path(&paths.csv).unwrap();
    let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][2], "6.322");
    assert_eq!(&records[1][0], "Total");
    // absent values are empty, not zero
    assert_eq!(&records[0][7], "");
}
