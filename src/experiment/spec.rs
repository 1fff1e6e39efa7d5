//! Declarative test specifications.
//!
//! A test-plan document lists, per measurement family, an ordered set of
//! specs. Each spec is decoded on its own so a malformed entry only skips that
//! entry; its siblings still run.
//!
//! ```json
//! {
//!   "lte": [{ "run": true, "center_frequency_ghz": [6.0, 6.2], "power_dbm": [-10, -5] }],
//!   "STN": [{ "run": true, "center_frequency_ghz": { "range": { "start_ghz": 6.0, "stop_ghz": 6.2, "step_mhz": 100 } } }],
//!   "spur_search": [{ "run": true, "fundamental_frequency_ghz": 6.0 }]
//! }
//! ```

use crate::error::{AppResult, SweepError};
use crate::measurement::Family;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Upper bound on the points a single range descriptor may generate.
pub const MAX_RANGE_POINTS: usize = 100_000;

// =============================================================================
// Parameters
// =============================================================================

/// Frequency input: one value, an ordered list, or a range descriptor (GHz).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrequencyParam {
    /// Single carrier frequency
    Single(f64),
    /// Explicit ordered list
    List(Vec<f64>),
    /// Inclusive range
    Range {
        /// Range bounds and step
        range: RangeDescriptor,
    },
}

/// `{start, stop, step}` frequency range. Bounds in GHz, step in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    /// First point (GHz)
    pub start_ghz: f64,
    /// Last point (GHz)
    pub stop_ghz: f64,
    /// Spacing (MHz)
    pub step_mhz: f64,
}

impl RangeDescriptor {
    /// Check `start <= stop`, `step > 0` and that every bound is finite.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.start_ghz.is_finite() && self.stop_ghz.is_finite() && self.step_mhz.is_finite())
        {
            return Err(SweepError::configuration(format!(
                "Non-numeric range bound: {:?}",
                self
            )));
        }
        if self.start_ghz > self.stop_ghz {
            return Err(SweepError::configuration(format!(
                "Start frequency ({} GHz) exceeds stop ({} GHz)",
                self.start_ghz, self.stop_ghz
            )));
        }
        if self.step_mhz <= 0.0 {
            return Err(SweepError::configuration(format!(
                "Invalid step size: {} MHz",
                self.step_mhz
            )));
        }
        Ok(())
    }

    /// Number of points: `floor((stop - start) / step) + 1`.
    ///
    /// Ranges that would yield more than [`MAX_RANGE_POINTS`] points are
    /// rejected as configuration errors.
    pub fn point_count(&self) -> AppResult<usize> {
        self.validate()?;
        let span = (self.stop_ghz - self.start_ghz) / (self.step_mhz / 1000.0);
        // 1e-9 absorbs binary representation error, e.g. (6.3 - 6.0) / 0.1
        let steps = (span + 1e-9).floor();
        if !steps.is_finite() || steps >= MAX_RANGE_POINTS as f64 {
            return Err(SweepError::configuration(format!(
                "Range {} - {} GHz at {} MHz exceeds {} points",
                self.start_ghz, self.stop_ghz, self.step_mhz, MAX_RANGE_POINTS
            )));
        }
        (steps as usize)
            .checked_add(1)
            .ok_or_else(|| SweepError::configuration("Range point count overflow"))
    }

    /// Point `index` of a range with `count` points (GHz).
    ///
    /// Points are evenly spaced; the last one is exactly `stop`.
    pub fn point(&self, index: usize, count: usize) -> f64 {
        if count <= 1 || index == 0 {
            return self.start_ghz;
        }
        if index >= count - 1 {
            return self.stop_ghz;
        }
        let spacing = (self.stop_ghz - self.start_ghz) / (count - 1) as f64;
        self.start_ghz + spacing * index as f64
    }

    /// Inclusive, evenly spaced points from start to stop (GHz), generated
    /// on demand.
    pub fn points(&self) -> AppResult<impl Iterator<Item = f64> + '_> {
        let count = self.point_count()?;
        Ok((0..count).map(move |i| self.point(i, count)))
    }
}

/// Power input: one value or an ordered list (dBm).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PowerParam {
    Single(f64),
    List(Vec<f64>),
}

impl PowerParam {
    /// Values in input order.
    pub fn values(&self) -> Vec<f64> {
        match self {
            PowerParam::Single(v) => vec![*v],
            PowerParam::List(values) => values.clone(),
        }
    }
}

/// Family-specific parameters, resolved with per-family defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestParameters {
    /// Requested resource blocks (LTE: negotiated by the generator when absent)
    pub resource_blocks: Option<u32>,
    /// Resource-block offset
    pub resource_block_offset: u32,
    /// Channel bandwidth (MHz)
    pub channel_bandwidth_mhz: u32,
    /// Modulation scheme
    pub modulation_type: String,
    /// NR5G subcarrier spacing (kHz)
    pub subcarrier_spacing_khz: u32,
    /// `FDD` / `TDD`
    pub duplexing: String,
    /// `UL` / `DL`
    pub link_direction: String,
    /// Spur-search resolution bandwidth (MHz)
    pub rbw_mhz: f64,
    /// Spur-search threshold (dBm)
    pub spur_limit_dbm: f64,
    /// Sub-thermal-noise iteration count
    pub iterations: u32,
    /// Fetch channel power when ACLR is not requested
    pub measure_ch_pwr: bool,
    /// Fetch adjacent-channel leakage
    pub measure_aclr: bool,
}

// =============================================================================
// TestSpec
// =============================================================================

/// One declarative measurement request.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpec {
    /// Measurement family
    pub family: Family,
    /// Run-enable flag
    pub run: bool,
    /// Carrier / fundamental frequency input (GHz)
    pub frequency: FrequencyParam,
    /// Generator level input; `None` for families that do not drive the generator
    pub power: Option<PowerParam>,
    /// Remaining parameters
    pub params: TestParameters,
}

/// Wire shape of a spec entry before defaults are applied.
#[derive(Debug, Deserialize)]
struct RawTestSpec {
    #[serde(default)]
    run: bool,
    #[serde(rename = "center_frequency_ghz", alias = "fundamental_frequency_ghz")]
    frequency: FrequencyParam,
    #[serde(default)]
    power_dbm: Option<PowerParam>,
    #[serde(default)]
    resource_blocks: Option<u32>,
    #[serde(default)]
    resource_block_offset: Option<u32>,
    #[serde(default)]
    channel_bandwidth_mhz: Option<u32>,
    #[serde(default)]
    modulation_type: Option<String>,
    #[serde(default)]
    subcarrier_spacing_khz: Option<u32>,
    #[serde(default)]
    duplexing: Option<String>,
    #[serde(default)]
    link_direction: Option<String>,
    #[serde(default)]
    rbw_mhz: Option<f64>,
    #[serde(default)]
    spur_limit_dbm: Option<f64>,
    #[serde(default)]
    iterations: Option<u32>,
    #[serde(default)]
    measure_ch_pwr: Option<bool>,
    #[serde(default)]
    measure_aclr: Option<bool>,
}

impl TestSpec {
    /// Decode one document entry for `family`, apply defaults and validate.
    pub fn from_entry(family: Family, entry: &Value) -> AppResult<Self> {
        let raw: RawTestSpec = serde_json::from_value(entry.clone()).map_err(|e| {
            SweepError::configuration(format!("Invalid {} test spec: {}", family, e))
        })?;

        let power = raw.power_dbm.or(match family {
            Family::Lte | Family::Nr5g => Some(PowerParam::Single(-10.0)),
            Family::SpurSearch => Some(PowerParam::Single(-70.0)),
            Family::SubThermalNoise => None,
        });
        let resource_blocks = match family {
            Family::Nr5g => raw.resource_blocks.or(Some(51)),
            _ => raw.resource_blocks,
        };

        let spec = TestSpec {
            family,
            run: raw.run,
            frequency: raw.frequency,
            power,
            params: TestParameters {
                resource_blocks,
                resource_block_offset: raw.resource_block_offset.unwrap_or(0),
                channel_bandwidth_mhz: raw.channel_bandwidth_mhz.unwrap_or(20),
                modulation_type: raw.modulation_type.unwrap_or_else(|| "QAM256".into()),
                subcarrier_spacing_khz: raw.subcarrier_spacing_khz.unwrap_or(30),
                duplexing: raw.duplexing.unwrap_or_else(|| "FDD".into()),
                link_direction: raw.link_direction.unwrap_or_else(|| "UL".into()),
                rbw_mhz: raw.rbw_mhz.unwrap_or(0.01),
                spur_limit_dbm: raw.spur_limit_dbm.unwrap_or(-95.0),
                iterations: raw.iterations.unwrap_or(10),
                measure_ch_pwr: raw.measure_ch_pwr.unwrap_or(true),
                measure_aclr: raw.measure_aclr.unwrap_or(true),
            },
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Structural checks that must pass before any instrument is touched.
    pub fn validate(&self) -> AppResult<()> {
        match &self.frequency {
            FrequencyParam::Single(f) if !f.is_finite() || *f <= 0.0 => {
                return Err(SweepError::configuration(format!("Invalid frequency: {} GHz", f)));
            }
            FrequencyParam::List(list) if list.is_empty() => {
                return Err(SweepError::configuration("Empty frequency list"));
            }
            FrequencyParam::List(list) if list.iter().any(|f| !f.is_finite() || *f <= 0.0) => {
                return Err(SweepError::configuration(format!(
                    "Invalid frequency in list: {:?}",
                    list
                )));
            }
            FrequencyParam::Range { range } => range.validate()?,
            _ => {}
        }
        if let Some(PowerParam::List(list)) = &self.power {
            if list.is_empty() {
                return Err(SweepError::configuration("Empty power list"));
            }
        }
        if self.family == Family::SubThermalNoise && self.params.iterations == 0 {
            return Err(SweepError::configuration("Iteration count must be at least 1"));
        }
        if self.family == Family::SpurSearch && self.params.rbw_mhz <= 0.0 {
            return Err(SweepError::configuration(format!(
                "Invalid resolution bandwidth: {} MHz",
                self.params.rbw_mhz
            )));
        }
        Ok(())
    }
}

// =============================================================================
// TestPlanDocument
// =============================================================================

/// The whole test-plan document, with entries kept undecoded until expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlanDocument {
    /// LTE specs
    #[serde(default)]
    pub lte: Vec<Value>,
    /// NR5G specs
    #[serde(default)]
    pub nr5g: Vec<Value>,
    /// Sub-thermal-noise specs
    #[serde(default, rename = "STN", alias = "stn")]
    pub stn: Vec<Value>,
    /// Spur-search specs
    #[serde(default)]
    pub spur_search: Vec<Value>,
}

impl TestPlanDocument {
    /// Built-in document used when no readable plan is supplied.
    pub fn builtin() -> Self {
        Self {
            lte: vec![json!({
                "run": true,
                "center_frequency_ghz": 6.201,
                "power_dbm": [-5.0],
                "resource_block_offset": 0,
                "channel_bandwidth_mhz": 5,
                "modulation_type": "QPSK",
                "duplexing": "TDD",
                "link_direction": "UL",
                "measure_ch_pwr": true,
                "measure_aclr": true
            })],
            nr5g: Vec::new(),
            stn: vec![json!({
                "run": true,
                "center_frequency_ghz": 6.321,
                "iterations": 3
            })],
            spur_search: vec![json!({
                "run": true,
                "fundamental_frequency_ghz": 6.0,
                "rbw_mhz": 0.01,
                "spur_limit_dbm": -95,
                "power_dbm": -10.0
            })],
        }
    }

    /// Raw entries for one family, in document order.
    pub fn entries(&self, family: Family) -> &[Value] {
        match family {
            Family::Lte => &self.lte,
            Family::Nr5g => &self.nr5g,
            Family::SubThermalNoise => &self.stn,
            Family::SpurSearch => &self.spur_search,
        }
    }

    /// Total number of entries across all families.
    pub fn len(&self) -> usize {
        Family::RUN_ORDER.iter().map(|f| self.entries(*f).len()).sum()
    }

    /// True if the document lists no specs at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
