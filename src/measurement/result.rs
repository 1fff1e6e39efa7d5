//! Measurement results and their per-family payloads.

use super::Family;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// TimingRecord
// =============================================================================

/// Elapsed seconds per instrument operation for one execution unit.
///
/// Filled by the timing recorder while the unit runs and frozen once the
/// result is assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimingRecord(BTreeMap<String, f64>);

impl TimingRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, operation: impl Into<String>, seconds: f64) {
        self.0.insert(operation.into(), seconds);
    }

    /// Elapsed seconds for `operation`, if it ran.
    pub fn get(&self, operation: &str) -> Option<f64> {
        self.0.get(operation).copied()
    }

    /// Whether `operation` was recorded.
    pub fn contains(&self, operation: &str) -> bool {
        self.0.contains_key(operation)
    }

    /// Sum of the given operations, treating absent ones as zero.
    pub fn sum_of(&self, operations: &[&str]) -> f64 {
        operations.iter().filter_map(|op| self.get(op)).sum()
    }

    /// Sum of every recorded operation.
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Iterate over `(operation, seconds)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Family payloads
// =============================================================================

/// Adjacent-channel leakage readout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AclrReading {
    /// Main channel power (dBm)
    pub channel_power_dbm: f64,
    /// Lower adjacent channel (dB)
    pub adjacent_lower_db: f64,
    /// Upper adjacent channel (dB)
    pub adjacent_upper_db: f64,
    /// Lower alternate channel (dB)
    pub alternate_lower_db: f64,
    /// Upper alternate channel (dB)
    pub alternate_upper_db: f64,
}

impl AclrReading {
    /// Parse the analyzer's comma-separated ACP result.
    ///
    /// Anything other than exactly five numeric values yields `None`.
    pub fn parse(response: &str) -> Option<Self> {
        let values = response
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        match values.as_slice() {
            &[channel, adj_l, adj_u, alt_l, alt_u] => Some(Self {
                channel_power_dbm: channel,
                adjacent_lower_db: adj_l,
                adjacent_upper_db: adj_u,
                alternate_lower_db: alt_l,
                alternate_upper_db: alt_u,
            }),
            _ => None,
        }
    }
}

/// LTE / NR5G signal-quality measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformMeasurement {
    /// Carrier frequency (Hz)
    pub center_frequency_hz: f64,
    /// Generator level (dBm)
    pub power_dbm: Option<f64>,
    /// Effective resource-block count (as negotiated by the generator for LTE)
    pub resource_blocks: Option<u32>,
    /// Resource-block offset
    pub resource_block_offset: u32,
    /// Channel bandwidth (MHz)
    pub channel_bandwidth_mhz: u32,
    /// Modulation scheme, e.g. `QPSK`, `QAM256`
    pub modulation: String,
    /// LTE only: `FDD` / `TDD`
    #[serde(default)]
    pub duplexing: Option<String>,
    /// LTE only: `UL` / `DL`
    #[serde(default)]
    pub link_direction: Option<String>,
    /// NR5G only: subcarrier spacing (kHz)
    #[serde(default)]
    pub subcarrier_spacing_khz: Option<u32>,
    /// Error-vector magnitude (dB); absent only when the unit failed first
    pub evm_db: Option<f64>,
    /// Channel power (dBm), from the ACLR readout or a dedicated fetch
    pub channel_power_dbm: Option<f64>,
    /// Adjacent-channel leakage, when requested and returned
    pub aclr: Option<AclrReading>,
}

/// A detected spurious emission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spur {
    /// Spur frequency (Hz)
    pub frequency_hz: f64,
    /// Spur level (dBm)
    pub power_dbm: f64,
}

/// Spur-search measurement around one fundamental.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpurMeasurement {
    /// Fundamental frequency (Hz)
    pub fundamental_frequency_hz: f64,
    /// Resolution bandwidth (Hz)
    pub rbw_hz: f64,
    /// Pass/fail threshold (dBm)
    pub spur_limit_dbm: f64,
    /// Generator level (dBm)
    pub power_dbm: Option<f64>,
    /// Detected spurs in analyzer order
    pub spurs: Vec<Spur>,
    /// Explicit marker for a clean search; never set on failed units
    pub no_spurs_detected: bool,
}

/// One marker reading of a sub-thermal-noise run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerReading {
    /// 1-based iteration index
    pub iteration: u32,
    /// Marker level (dBm)
    pub marker_dbm: f64,
    /// Time spent acquiring this reading (s)
    pub meas_time_s: f64,
}

/// Aggregate statistics over the marker readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NoiseStatistics {
    pub min_dbm: f64,
    pub max_dbm: f64,
    pub avg_dbm: f64,
    pub std_dev_db: f64,
    pub delta_db: f64,
}

impl NoiseStatistics {
    /// Population statistics over the readings, `None` when there are none.
    pub fn from_readings(readings: &[MarkerReading]) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        let n = readings.len() as f64;
        let values = readings.iter().map(|r| r.marker_dbm);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.clone().sum::<f64>() / n;
        let variance = values.map(|v| (v - avg).powi(2)).sum::<f64>() / n;
        Some(Self {
            min_dbm: min,
            max_dbm: max,
            avg_dbm: avg,
            std_dev_db: variance.sqrt(),
            delta_db: max - min,
        })
    }
}

/// Sub-thermal-noise measurement at one frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseMeasurement {
    /// Analyzer center frequency (Hz)
    pub center_frequency_hz: f64,
    /// Requested iteration count
    pub iterations: u32,
    /// Readings actually taken, in order
    pub markers: Vec<MarkerReading>,
    /// Aggregates over `markers`
    pub statistics: Option<NoiseStatistics>,
}

/// Family-specific measurement payload.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family")]
pub enum Measurement {
    #[serde(rename = "LTE")]
    Lte(WaveformMeasurement),
    #[serde(rename = "NR5G")]
    Nr5g(WaveformMeasurement),
    #[serde(rename = "SpurSearch")]
    SpurSearch(SpurMeasurement),
    #[serde(rename = "STN")]
    SubThermalNoise(NoiseMeasurement),
}

impl Measurement {
    /// Family tag of this payload.
    pub fn family(&self) -> Family {
        match self {
            Measurement::Lte(_) => Family::Lte,
            Measurement::Nr5g(_) => Family::Nr5g,
            Measurement::SpurSearch(_) => Family::SpurSearch,
            Measurement::SubThermalNoise(_) => Family::SubThermalNoise,
        }
    }
}

// =============================================================================
// MeasurementResult
// =============================================================================

/// Outcome of one execution unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Sequence identifier of the execution unit
    pub sequence_id: u64,
    /// Instrument configuration summary, if it was retrieved
    pub config_summary: Option<String>,
    /// Timings captured while the unit ran (partial on failure)
    pub timings: TimingRecord,
    /// Failure description; `None` for successful units
    #[serde(default)]
    pub error: Option<String>,
    /// Family payload
    pub measurement: Measurement,
}

impl MeasurementResult {
    /// Family tag of this result.
    pub fn family(&self) -> Family {
        self.measurement.family()
    }

    /// Whether the unit failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
