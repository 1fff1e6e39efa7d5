//! Reconfiguration gating.
//!
//! Full instrument reconfiguration is the most expensive step of a unit. The
//! cache remembers the fingerprint last applied for the active family and
//! reports whether the next unit can reuse it. Fingerprints are never compared
//! across families: entering a different family clears everything.

use super::sweep::ExecutionUnit;
use crate::measurement::Family;
use std::collections::HashMap;
use tracing::debug;

/// Parameters that decide whether a unit needs full reconfiguration.
///
/// Frequency and power are not part of it; they are applied on every unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFingerprint {
    /// LTE carrier layout
    Lte {
        /// Resource-block offset
        resource_block_offset: u32,
        /// Channel bandwidth (MHz)
        channel_bandwidth_mhz: u32,
        /// Modulation scheme
        modulation: String,
        /// Duplexing mode
        duplexing: String,
        /// Link direction
        link_direction: String,
    },
    /// NR5G carrier layout
    Nr5g {
        /// Resource blocks
        resource_blocks: Option<u32>,
        /// Resource-block offset
        resource_block_offset: u32,
        /// Channel bandwidth (MHz)
        channel_bandwidth_mhz: u32,
        /// Modulation scheme
        modulation: String,
        /// Subcarrier spacing (kHz)
        subcarrier_spacing_khz: u32,
    },
    /// Spur-search scan ranges depend on the fundamental
    SpurSearch {
        /// Fundamental (Hz)
        fundamental_hz: f64,
        /// Resolution bandwidth (MHz)
        rbw_mhz: f64,
        /// Threshold (dBm)
        spur_limit_dbm: f64,
    },
    /// Sub-thermal-noise analyzer setup only varies in its iteration count
    SubThermalNoise {
        /// Marker readings per unit
        iterations: u32,
    },
}

impl ConfigFingerprint {
    /// Fingerprint of `unit`.
    pub fn of(unit: &ExecutionUnit) -> Self {
        let p = &unit.params;
        match unit.family {
            Family::Lte => ConfigFingerprint::Lte {
                resource_block_offset: p.resource_block_offset,
                channel_bandwidth_mhz: p.channel_bandwidth_mhz,
                modulation: p.modulation_type.clone(),
                duplexing: p.duplexing.clone(),
                link_direction: p.link_direction.clone(),
            },
            Family::Nr5g => ConfigFingerprint::Nr5g {
                resource_blocks: p.resource_blocks,
                resource_block_offset: p.resource_block_offset,
                channel_bandwidth_mhz: p.channel_bandwidth_mhz,
                modulation: p.modulation_type.clone(),
                subcarrier_spacing_khz: p.subcarrier_spacing_khz,
            },
            Family::SpurSearch => ConfigFingerprint::SpurSearch {
                fundamental_hz: unit.frequency_hz,
                rbw_mhz: p.rbw_mhz,
                spur_limit_dbm: p.spur_limit_dbm,
            },
            Family::SubThermalNoise => ConfigFingerprint::SubThermalNoise {
                iterations: p.iterations,
            },
        }
    }
}

/// Last-applied fingerprint per family, owned by the executor.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    active_family: Option<Family>,
    entries: HashMap<Family, ConfigFingerprint>,
}

impl FingerprintCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `family` as the one currently executing.
    ///
    /// Switching to a different family drops every cached fingerprint, so the
    /// first unit of the new family always reconfigures.
    pub fn enter_family(&mut self, family: Family) {
        if self.active_family != Some(family) {
            if let Some(previous) = self.active_family {
                debug!(from = %previous, to = %family, "Family changed, clearing fingerprint cache");
            }
            self.entries.clear();
            self.active_family = Some(family);
        }
    }

    /// Whether `fingerprint` differs from what is applied for `family`.
    pub fn needs_reconfiguration(&self, family: Family, fingerprint: &ConfigFingerprint) -> bool {
        if self.active_family != Some(family) {
            return true;
        }
        self.entries.get(&family) != Some(fingerprint)
    }

    /// Record a successfully applied fingerprint.
    pub fn store(&mut self, family: Family, fingerprint: ConfigFingerprint) {
        self.enter_family(family);
        self.entries.insert(family, fingerprint);
    }

    /// Forget the applied configuration for `family`.
    pub fn invalidate(&mut self, family: Family) {
        self.entries.remove(&family);
    }

    /// Fingerprint currently applied for `family`.
    pub fn current(&self, family: Family) -> Option<&ConfigFingerprint> {
        self.entries.get(&family)
    }
}
