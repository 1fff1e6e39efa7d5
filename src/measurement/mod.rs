//! Measurement data model.
//!
//! Every execution unit produces exactly one [`MeasurementResult`]. The result
//! is a tagged union over the measurement family so the reporting layer can
//! match on the shape instead of probing loosely-typed fields.

mod result;
mod store;

pub use result::{
    AclrReading, MarkerReading, Measurement, MeasurementResult, NoiseMeasurement,
    NoiseStatistics, Spur, SpurMeasurement, TimingRecord, WaveformMeasurement,
};
pub use store::ResultStore;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Measurement family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    /// LTE signal quality (EVM, ACLR, channel power)
    #[serde(rename = "LTE")]
    Lte,
    /// 5G NR FR1 signal quality
    #[serde(rename = "NR5G")]
    Nr5g,
    /// Frequency-domain spurious emission search
    #[serde(rename = "SpurSearch")]
    SpurSearch,
    /// Sub-thermal noise floor marker readings
    #[serde(rename = "STN")]
    SubThermalNoise,
}

impl Family {
    /// Families in the order a run processes them.
    pub const RUN_ORDER: [Family; 4] = [
        Family::Lte,
        Family::Nr5g,
        Family::SubThermalNoise,
        Family::SpurSearch,
    ];

    /// Short label used in logs and the tabular report.
    pub fn label(self) -> &'static str {
        match self {
            Family::Lte => "LTE",
            Family::Nr5g => "NR5G",
            Family::SpurSearch => "SpurSearch",
            Family::SubThermalNoise => "STN",
        }
    }

    /// Key of this family's spec list in the test-plan document.
    pub fn document_key(self) -> &'static str {
        match self {
            Family::Lte => "lte",
            Family::Nr5g => "nr5g",
            Family::SpurSearch => "spur_search",
            Family::SubThermalNoise => "STN",
        }
    }

    /// Whether this is one of the modulated waveform families (LTE/NR5G).
    pub fn is_waveform(self) -> bool {
        matches!(self, Family::Lte | Family::Nr5g)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
