//! Instrument session interface.
//!
//! A session owns the analyzer (VSA) and, where the family needs one, the
//! generator (VSG) connection for one measurement family. The executor drives
//! it one call at a time and times every call itself, so implementations only
//! return values.
//!
//! # Contract
//! - Calls are strictly sequential; a session is never shared between tasks.
//! - Errors use `anyhow::Result` and are turned into error-bearing results at
//!   the unit boundary. They never abort a sweep on their own.
//! - `close` is best-effort and may be called after any failure.

use crate::experiment::sweep::ExecutionUnit;
use crate::measurement::{AclrReading, Family, Spur};
use anyhow::{bail, Result};
use async_trait::async_trait;

/// One family's connection to the bench.
#[async_trait]
pub trait InstrumentSession: Send {
    /// Family served by this session.
    fn family(&self) -> Family;

    /// Full generator setup for the unit's carrier layout.
    async fn configure_generator(&mut self, unit: &ExecutionUnit) -> Result<()>;

    /// Full analyzer setup for the unit's carrier layout.
    async fn configure_analyzer(&mut self, unit: &ExecutionUnit) -> Result<()>;

    /// Tune both instruments to `hz`.
    async fn set_frequency(&mut self, hz: f64) -> Result<()>;

    /// Set the generator level.
    async fn set_power(&mut self, dbm: f64) -> Result<()>;

    /// Resource-block count actually in effect, when the generator negotiates it.
    async fn effective_resource_blocks(&mut self) -> Result<Option<u32>> {
        Ok(None)
    }

    /// Short description of the applied configuration.
    async fn config_summary(&mut self) -> Result<String>;

    /// Synchronous acquisition; returns once the instrument acknowledges.
    async fn sweep(&mut self) -> Result<()>;

    /// Error-vector magnitude (dB) of the last acquisition.
    async fn evm(&mut self) -> Result<f64> {
        bail!("{} session does not measure EVM", self.family())
    }

    /// Adjacent-channel leakage; `None` when the readout is malformed.
    async fn aclr(&mut self) -> Result<Option<AclrReading>> {
        bail!("{} session does not measure ACLR", self.family())
    }

    /// Channel power (dBm).
    async fn channel_power(&mut self) -> Result<f64> {
        bail!("{} session does not measure channel power", self.family())
    }

    /// Spurs found by the last acquisition, in analyzer order.
    async fn spurs(&mut self) -> Result<Vec<Spur>> {
        bail!("{} session does not search for spurs", self.family())
    }

    /// One marker reading (dBm).
    async fn marker(&mut self) -> Result<f64> {
        bail!("{} session does not read markers", self.family())
    }

    /// Release the instrument connections.
    async fn close(&mut self) -> Result<()>;
}

/// Opens a session per family on first use.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Establish the connections for `family`.
    async fn open(&self, family: Family) -> Result<Box<dyn InstrumentSession>>;
}
