//! Flattening of heterogeneous results into report rows.
//!
//! | Family | Rows per result |
//! |---|---|
//! | LTE / NR5G | exactly one |
//! | SpurSearch | one per spur; one `No spurs detected` row for a clean search |
//! | STN | one per marker reading |
//!
//! An error-bearing result with nothing else to show still yields one row.
//! Within a multi-row group, the summary columns (total test time, config
//! summary, reconfiguration and info times) are filled on the first row only so
//! column sums do not double count. A trailing `Total` row sums the
//! per-row test time over the whole store.

use crate::experiment::timing::keys;
use crate::measurement::{
    Measurement, MeasurementResult, NoiseMeasurement, ResultStore, SpurMeasurement,
    WaveformMeasurement,
};
use serde::{Serialize, Serializer};

/// Error-column text of a clean spur search.
pub const NO_SPURS_DETECTED: &str = "No spurs detected";

/// Tabular report header, in column order.
pub const COLUMNS: [&str; 29] = [
    "Test Set",
    "Type",
    "Center Frequency (GHz)",
    "Power (dBm)",
    "Resource Blocks",
    "Channel Bandwidth (MHz)",
    "Modulation Type",
    "EVM (dB)",
    "EVM Capture Time (s)",
    "CH Power (dBm)",
    "ACP Lower (dB)",
    "ACP Upper (dB)",
    "ACLR Capture Time (s)",
    "Total Test Time (s)",
    "Config Summary",
    "VSG_Config Time (s)",
    "VSA_Config Time (s)",
    "VSA_get_info Time (s)",
    "Iteration",
    "Marker (dBm)",
    "Marker Time (s)",
    "Stats Avg (dBm)",
    "Fundamental Frequency (GHz)",
    "RBW (MHz)",
    "Spur Limit (dBm)",
    "Spur Frequency (MHz)",
    "Spur Power (dBm)",
    "Spur Measurement Time (s)",
    "Error",
];

/// Fixed three-decimal rendering for frequency columns.
fn fixed3<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_str(&format!("{:.3}", v)),
        None => serializer.serialize_none(),
    }
}

/// One row of the tabular report. Absent values stay `None`, never zero.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportRow {
    #[serde(rename = "Test Set")]
    pub test_set: String,
    #[serde(rename = "Type")]
    pub family: String,
    #[serde(rename = "Center Frequency (GHz)", serialize_with = "fixed3")]
    pub center_frequency_ghz: Option<f64>,
    #[serde(rename = "Power (dBm)")]
    pub power_dbm: Option<f64>,
    #[serde(rename = "Resource Blocks")]
    pub resource_blocks: Option<u32>,
    #[serde(rename = "Channel Bandwidth (MHz)")]
    pub channel_bandwidth_mhz: Option<u32>,
    #[serde(rename = "Modulation Type")]
    pub modulation: Option<String>,
    #[serde(rename = "EVM (dB)")]
    pub evm_db: Option<f64>,
    #[serde(rename = "EVM Capture Time (s)")]
    pub evm_capture_time_s: Option<f64>,
    #[serde(rename = "CH Power (dBm)")]
    pub channel_power_dbm: Option<f64>,
    #[serde(rename = "ACP Lower (dB)")]
    pub acp_lower_db: Option<f64>,
    #[serde(rename = "ACP Upper (dB)")]
    pub acp_upper_db: Option<f64>,
    #[serde(rename = "ACLR Capture Time (s)")]
    pub aclr_capture_time_s: Option<f64>,
    #[serde(rename = "Total Test Time (s)")]
    pub total_test_time_s: Option<f64>,
    #[serde(rename = "Config Summary")]
    pub config_summary: Option<String>,
    #[serde(rename = "VSG_Config Time (s)")]
    pub vsg_config_time_s: Option<f64>,
    #[serde(rename = "VSA_Config Time (s)")]
    pub vsa_config_time_s: Option<f64>,
    #[serde(rename = "VSA_get_info Time (s)")]
    pub vsa_get_info_time_s: Option<f64>,
    #[serde(rename = "Iteration")]
    pub iteration: Option<u32>,
    #[serde(rename = "Marker (dBm)")]
    pub marker_dbm: Option<f64>,
    #[serde(rename = "Marker Time (s)")]
    pub marker_time_s: Option<f64>,
    #[serde(rename = "Stats Avg (dBm)")]
    pub stats_avg_dbm: Option<f64>,
    #[serde(rename = "Fundamental Frequency (GHz)", serialize_with = "fixed3")]
    pub fundamental_frequency_ghz: Option<f64>,
    #[serde(rename = "RBW (MHz)", serialize_with = "fixed3")]
    pub rbw_mhz: Option<f64>,
    #[serde(rename = "Spur Limit (dBm)")]
    pub spur_limit_dbm: Option<f64>,
    #[serde(rename = "Spur Frequency (MHz)", serialize_with = "fixed3")]
    pub spur_frequency_mhz: Option<f64>,
    #[serde(rename = "Spur Power (dBm)")]
    pub spur_power_dbm: Option<f64>,
    #[serde(rename = "Spur Measurement Time (s)")]
    pub spur_measurement_time_s: Option<f64>,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

impl ReportRow {
    /// Row with the identifying columns of `result` filled in.
    fn base(result: &MeasurementResult) -> Self {
        Self {
            test_set: result.sequence_id.to_string(),
            family: result.family().label().to_string(),
            error: result.error.clone(),
            ..Default::default()
        }
    }

    /// Fill the first-row-only summary columns.
    fn with_summary(mut self, result: &MeasurementResult, test_time_s: f64) -> Self {
        self.total_test_time_s = Some(test_time_s);
        self.config_summary = result.config_summary.clone();
        self.vsg_config_time_s = result.timings.get(keys::VSG_CONFIG);
        self.vsa_config_time_s = result.timings.get(keys::VSA_CONFIG);
        self.vsa_get_info_time_s = result.timings.get(keys::CONFIG_SUMMARY);
        self
    }

    /// Synthetic totals row.
    fn total(total_test_time_s: f64) -> Self {
        Self {
            test_set: "Total".to_string(),
            total_test_time_s: Some(total_test_time_s),
            config_summary: Some("N/A".to_string()),
            ..Default::default()
        }
    }
}

/// Per-result test time that feeds the totals row.
///
/// - LTE / NR5G: sweep + EVM fetch + ACLR
/// - SpurSearch: every recorded operation
/// - STN: sum of marker acquisition times
pub fn test_time_s(result: &MeasurementResult) -> f64 {
    match &result.measurement {
        Measurement::Lte(_) | Measurement::Nr5g(_) => {
            result.timings.sum_of(&keys::WAVEFORM_TEST_TIME)
        }
        Measurement::SpurSearch(_) => result.timings.total(),
        Measurement::SubThermalNoise(n) => n.markers.iter().map(|m| m.meas_time_s).sum(),
    }
}

/// Flatten the store into report rows, ending with the `Total` row.
///
/// An empty store yields no rows at all (header-only table).
pub fn flatten(store: &ResultStore) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = store.iter().flat_map(rows_for).collect();
    if !rows.is_empty() {
        let total = rows.iter().filter_map(|r| r.total_test_time_s).sum();
        rows.push(ReportRow::total(total));
    }
    rows
}

/// Rows of a single result.
pub fn rows_for(result: &MeasurementResult) -> Vec<ReportRow> {
    let test_time = test_time_s(result);
    match &result.measurement {
        Measurement::Lte(w) | Measurement::Nr5g(w) => {
            vec![waveform_row(result, w).with_summary(result, test_time)]
        }
        Measurement::SpurSearch(s) => spur_rows(result, s, test_time),
        Measurement::SubThermalNoise(n) => noise_rows(result, n, test_time),
    }
}

fn waveform_row(result: &MeasurementResult, w: &WaveformMeasurement) -> ReportRow {
    ReportRow {
        center_frequency_ghz: Some(w.center_frequency_hz / 1e9),
        power_dbm: w.power_dbm,
        resource_blocks: w.resource_blocks,
        channel_bandwidth_mhz: Some(w.channel_bandwidth_mhz),
        modulation: Some(w.modulation.clone()),
        evm_db: w.evm_db,
        evm_capture_time_s: result.timings.get(keys::SWEEP_EVM),
        channel_power_dbm: w.channel_power_dbm,
        acp_lower_db: w.aclr.map(|a| a.adjacent_lower_db),
        acp_upper_db: w.aclr.map(|a| a.adjacent_upper_db),
        aclr_capture_time_s: result.timings.get(keys::ACLR),
        ..ReportRow::base(result)
    }
}

fn spur_rows(result: &MeasurementResult, s: &SpurMeasurement, test_time: f64) -> Vec<ReportRow> {
    let parent = ReportRow {
        fundamental_frequency_ghz: Some(s.fundamental_frequency_hz / 1e9),
        rbw_mhz: Some(s.rbw_hz / 1e6),
        spur_limit_dbm: Some(s.spur_limit_dbm),
        power_dbm: s.power_dbm,
        spur_measurement_time_s: result.timings.get(keys::SPUR_RESULTS),
        ..ReportRow::base(result)
    };

    if s.spurs.is_empty() {
        let mut row = parent.with_summary(result, test_time);
        if s.no_spurs_detected && row.error.is_none() {
            row.error = Some(NO_SPURS_DETECTED.to_string());
        }
        return vec![row];
    }

    s.spurs
        .iter()
        .enumerate()
        .map(|(i, spur)| {
            let row = ReportRow {
                spur_frequency_mhz: Some(spur.frequency_hz / 1e6),
                spur_power_dbm: Some(spur.power_dbm),
                ..parent.clone()
            };
            if i == 0 {
                row.with_summary(result, test_time)
            } else {
                row
            }
        })
        .collect()
}

fn noise_rows(result: &MeasurementResult, n: &NoiseMeasurement, test_time: f64) -> Vec<ReportRow> {
    let parent = ReportRow {
        center_frequency_ghz: Some(n.center_frequency_hz / 1e9),
        stats_avg_dbm: n.statistics.map(|s| s.avg_dbm),
        ..ReportRow::base(result)
    };

    if n.markers.is_empty() {
        return vec![parent.with_summary(result, test_time)];
    }

    n.markers
        .iter()
        .enumerate()
        .map(|(i, marker)| {
            let row = ReportRow {
                iteration: Some(marker.iteration),
                marker_dbm: Some(marker.marker_dbm),
                marker_time_s: Some(marker.meas_time_s),
                ..parent.clone()
            };
            if i == 0 {
                row.with_summary(result, test_time)
            } else {
                row
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{AclrReading, MarkerReading, NoiseStatistics, Spur, TimingRecord};

    fn timings(entries: &[(&str, f64)]) -> TimingRecord {
        let mut record = TimingRecord::new();
        for (key, seconds) in entries {
            record.insert(*key, *seconds);
        }
        record
    }

    fn spur_result(id: u64, spurs: Vec<Spur>) -> MeasurementResult {
        MeasurementResult {
            sequence_id: id,
            config_summary: Some("6.000GHz_Spur_RBW0.010MHz_Limit-95.00dBm".into()),
            timings: timings(&[
                (keys::VSG_CONFIG, 0.5),
                (keys::VSA_CONFIG, 1.0),
                (keys::SWEEP_SPUR, 2.0),
                (keys::SPUR_RESULTS, 0.25),
            ]),
            error: None,
            measurement: Measurement::SpurSearch(SpurMeasurement {
                fundamental_frequency_hz: 6e9,
                rbw_hz: 1e4,
                spur_limit_dbm: -95.0,
                power_dbm: Some(-10.0),
                no_spurs_detected: spurs.is_empty(),
                spurs,
            }),
        }
    }

    fn lte_result(id: u64, error: Option<&str>) -> MeasurementResult {
        MeasurementResult {
            sequence_id: id,
            config_summary: Some("6.201GHz_5MHz_TDD_UL_15kHz_25RB_0RBO_QPSK".into()),
            timings: timings(&[
                (keys::VSG_CONFIG, 3.0),
                (keys::SWEEP_EVM, 0.5),
                (keys::EVM, 0.25),
                (keys::ACLR, 1.0),
                (keys::FREQUENCY, 9.0),
            ]),
            error: error.map(str::to_string),
            measurement: Measurement::Lte(WaveformMeasurement {
                center_frequency_hz: 6.201e9,
                power_dbm: Some(-5.0),
                resource_blocks: Some(25),
                resource_block_offset: 0,
                channel_bandwidth_mhz: 5,
                modulation: "QPSK".into(),
                duplexing: Some("TDD".into()),
                link_direction: Some("UL".into()),
                subcarrier_spacing_khz: None,
                evm_db: Some(-42.0),
                channel_power_dbm: Some(-10.0),
                aclr: AclrReading::parse("-10,-45,-46,-60,-61"),
            }),
        }
    }

    #[test]
    fn clean_spur_search_yields_one_marked_row() {
        let rows = rows_for(&spur_result(0, vec![]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].error.as_deref(), Some(NO_SPURS_DETECTED));
        assert_eq!(rows[0].spur_frequency_mhz, None);
        assert_eq!(rows[0].spur_power_dbm, None);
        assert_eq!(rows[0].total_test_time_s, Some(3.75));
    }

    #[test]
    fn spur_summary_fields_only_on_first_row() {
        let spurs = vec![
            Spur { frequency_hz: 3.2e9, power_dbm: -97.0 },
            Spur { frequency_hz: 9.1e9, power_dbm: -96.5 },
            Spur { frequency_hz: 11.0e9, power_dbm: -98.2 },
        ];
        let rows = rows_for(&spur_result(2, spurs));
        assert_eq!(rows.len(), 3);
        assert!(rows[0].total_test_time_s.is_some());
        assert!(rows[0].config_summary.is_some());
        assert!(rows[0].vsa_config_time_s.is_some());
        for row in &rows[1..] {
            assert_eq!(row.total_test_time_s, None);
            assert_eq!(row.config_summary, None);
            assert_eq!(row.vsg_config_time_s, None);
            assert_eq!(row.fundamental_frequency_ghz, Some(6.0));
            assert!(row.error.is_none());
        }
        assert_eq!(rows[2].spur_frequency_mhz, Some(11_000.0));
    }

    #[test]
    fn waveform_test_time_ignores_configuration() {
        let rows = rows_for(&lte_result(0, None));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_test_time_s, Some(1.75));
        assert_eq!(rows[0].acp_upper_db, Some(-46.0));
        assert_eq!(rows[0].vsa_config_time_s, None);
        assert_eq!(rows[0].vsg_config_time_s, Some(3.0));
    }

    #[test]
    fn noise_rows_follow_markers() {
        let markers: Vec<MarkerReading> = (1..=3)
            .map(|i| MarkerReading {
                iteration: i,
                marker_dbm: -170.0,
                meas_time_s: 0.5,
            })
            .collect();
        let result = MeasurementResult {
            sequence_id: 9,
            config_summary: Some("6.321GHz_STN_3it".into()),
            timings: timings(&[(keys::MARKER, 1.5)]),
            error: None,
            measurement: Measurement::SubThermalNoise(NoiseMeasurement {
                center_frequency_hz: 6.321e9,
                iterations: 3,
                statistics: NoiseStatistics::from_readings(&markers),
                markers,
            }),
        };
        let rows = rows_for(&result);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].total_test_time_s, Some(1.5));
        assert_eq!(rows[1].total_test_time_s, None);
        assert_eq!(rows[2].iteration, Some(3));
        assert_eq!(rows[2].stats_avg_dbm, Some(-170.0));
    }

    #[test]
    fn total_row_sums_every_row() {
        let store: ResultStore = vec![
            lte_result(0, None),
            lte_result(1, Some("EVM fetch timed out")),
            spur_result(2, vec![]),
        ]
        .into_iter()
        .collect();
        let rows = flatten(&store);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].error.as_deref(), Some("EVM fetch timed out"));

        let total = rows.last().unwrap();
        assert_eq!(total.test_set, "Total");
        assert_eq!(total.config_summary.as_deref(), Some("N/A"));
        assert_eq!(total.total_test_time_s, Some(1.75 + 1.75 + 3.75));
    }

    #[test]
    fn empty_store_has_no_rows() {
        assert!(flatten(&ResultStore::new()).is_empty());
    }

    #[test]
    fn header_matches_row_layout() {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(ReportRow::default()).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, COLUMNS.join(","));
    }

    #[test]
    fn frequencies_render_with_three_decimals() {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(vec![]);
        writer.serialize(&rows_for(&lte_result(0, None))[0]).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.starts_with("0,LTE,6.201,-5.0,25,5,QPSK,"));
    }
}
