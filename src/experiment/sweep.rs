//! Sweep expansion.
//!
//! A [`SweepPlan`] is the resolved form of one [`TestSpec`]: the frequency
//! point set and the power list. It never touches an instrument. Execution
//! units are produced lazily by [`SweepPlan::units`], frequency in the outer
//! loop and power in the inner loop, and the plan can be iterated again from
//! the start as many times as needed.

use super::spec::{FrequencyParam, RangeDescriptor, TestParameters, TestSpec};
use crate::config::SweepSettings;
use crate::error::AppResult;
use crate::measurement::Family;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// One fully resolved, runnable measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionUnit {
    /// Run-wide sequence identifier
    pub sequence_id: u64,
    /// Measurement family
    pub family: Family,
    /// Carrier / fundamental frequency (Hz)
    pub frequency_hz: f64,
    /// Generator level (dBm), absent for families without a generator
    pub power_dbm: Option<f64>,
    /// Remaining spec parameters
    pub params: TestParameters,
}

impl ExecutionUnit {
    /// Carrier frequency in GHz.
    pub fn frequency_ghz(&self) -> f64 {
        self.frequency_hz / 1e9
    }
}

/// Advisory emitted for large range sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeAdvisory {
    /// Generated range points
    pub point_count: usize,
    /// point_count x iterations x unit time
    pub estimated_runtime: Duration,
}

/// Frequency point set of a plan.
///
/// Range points are computed from their index when a unit is produced, so a
/// range costs the same memory whatever its length.
#[derive(Debug, Clone, PartialEq)]
enum FrequencyPoints {
    Listed(Vec<f64>),
    Range { range: RangeDescriptor, count: usize },
}

impl FrequencyPoints {
    fn len(&self) -> usize {
        match self {
            FrequencyPoints::Listed(list) => list.len(),
            FrequencyPoints::Range { count, .. } => *count,
        }
    }

    fn get(&self, index: usize) -> f64 {
        match self {
            FrequencyPoints::Listed(list) => list[index],
            FrequencyPoints::Range { range, count } => range.point(index, *count),
        }
    }
}

/// Expanded form of a single test spec.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    family: Family,
    frequencies: FrequencyPoints,
    powers_dbm: Vec<Option<f64>>,
    params: TestParameters,
    advisory: Option<RuntimeAdvisory>,
}

impl SweepPlan {
    /// Resolve the spec's parameter sets.
    ///
    /// Fails with a configuration error when the spec is structurally
    /// invalid; nothing is expanded in that case.
    pub fn expand(spec: &TestSpec, settings: &SweepSettings) -> AppResult<Self> {
        spec.validate()?;

        let mut advisory = None;
        let frequencies = match &spec.frequency {
            FrequencyParam::Single(f) => FrequencyPoints::Listed(vec![*f]),
            FrequencyParam::List(list) => FrequencyPoints::Listed(list.clone()),
            FrequencyParam::Range { range } => {
                let count = range.point_count()?;
                if count > settings.advisory_threshold {
                    let estimate =
                        count as f64 * f64::from(spec.params.iterations) * settings.unit_time_s;
                    let advice = RuntimeAdvisory {
                        point_count: count,
                        estimated_runtime: Duration::try_from_secs_f64(estimate)
                            .unwrap_or(Duration::MAX),
                    };
                    warn!(
                        family = %spec.family,
                        points = advice.point_count,
                        estimated_s = estimate,
                        "Large frequency range, this sweep will take a while"
                    );
                    advisory = Some(advice);
                }
                FrequencyPoints::Range {
                    range: *range,
                    count,
                }
            }
        };

        let powers_dbm = match &spec.power {
            Some(power) => power.values().into_iter().map(Some).collect(),
            None => vec![None],
        };

        debug!(
            family = %spec.family,
            frequencies = frequencies.len(),
            powers = powers_dbm.len(),
            "Expanded test spec"
        );

        Ok(Self {
            family: spec.family,
            frequencies,
            powers_dbm,
            params: spec.params.clone(),
            advisory,
        })
    }

    /// Family this plan belongs to.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Number of distinct frequency points.
    pub fn frequency_count(&self) -> usize {
        self.frequencies.len()
    }

    /// Runtime advisory, if the range exceeded the threshold.
    pub fn advisory(&self) -> Option<RuntimeAdvisory> {
        self.advisory
    }

    /// Number of execution units the plan yields.
    pub fn len(&self) -> usize {
        self.frequencies.len() * self.powers_dbm.len()
    }

    /// True if the plan yields no units.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily yield execution units numbered from `first_id`.
    pub fn units(&self, first_id: u64) -> Units<'_> {
        Units {
            plan: self,
            index: 0,
            first_id,
        }
    }
}

/// Iterator over a plan's execution units.
#[derive(Debug, Clone)]
pub struct Units<'a> {
    plan: &'a SweepPlan,
    index: usize,
    first_id: u64,
}

impl Iterator for Units<'_> {
    type Item = ExecutionUnit;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.plan.len() {
            return None;
        }
        let per_frequency = self.plan.powers_dbm.len();
        let frequency_ghz = self.plan.frequencies.get(self.index / per_frequency);
        let power_dbm = self.plan.powers_dbm[self.index % per_frequency];
        let unit = ExecutionUnit {
            sequence_id: self.first_id + self.index as u64,
            family: self.plan.family,
            frequency_hz: frequency_ghz * 1e9,
            power_dbm,
            params: self.plan.params.clone(),
        };
        self.index += 1;
        Some(unit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Units<'_> {}
