//! Sub-thermal-noise floor readings.
//!
//! Analyzer only: narrow RBW, RMS detector, preamplifier on, no attenuation.
//! Each reading is one acquisition followed by a marker query at the center
//! frequency.

use super::scpi::ScpiTransport;
use super::session::InstrumentSession;
use crate::experiment::sweep::ExecutionUnit;
use crate::measurement::Family;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Sub-thermal-noise session.
pub struct NoiseSession {
    vsa: Arc<dyn ScpiTransport>,
    frequency_hz: f64,
    iterations: u32,
}

impl NoiseSession {
    /// Wrap an already opened analyzer transport.
    pub fn new(vsa: Arc<dyn ScpiTransport>) -> Self {
        Self {
            vsa,
            frequency_hz: 6e9,
            iterations: 10,
        }
    }
}

#[async_trait]
impl InstrumentSession for NoiseSession {
    fn family(&self) -> Family {
        Family::SubThermalNoise
    }

    async fn configure_generator(&mut self, _unit: &ExecutionUnit) -> Result<()> {
        Ok(())
    }

    async fn configure_analyzer(&mut self, unit: &ExecutionUnit) -> Result<()> {
        self.frequency_hz = unit.frequency_hz;
        self.iterations = unit.params.iterations;
        info!("Configuring VSA for sub-thermal noise");

        self.vsa.write_and_wait("*RST").await?;
        self.vsa.write(&format!(":SENS:FREQ:CENT {:.0}", unit.frequency_hz)).await?;
        self.vsa.write(":SENS:FREQ:SPAN 1MHz").await?;
        self.vsa.write(":SENS:BAND:RES 1kHz").await?;
        self.vsa.write(":SENS:DET RMS").await?;
        self.vsa.write(":INP:ATT:AUTO OFF").await?;
        self.vsa.write(":INP:ATT 0").await?;
        self.vsa.write(":INP:GAIN:STAT ON").await?;
        self.vsa.write(":CALC:MARK1:STAT ON").await?;
        self.vsa.write("INIT:CONT OFF").await?;
        Ok(())
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.vsa.write(&format!(":SENS:FREQ:CENT {:.0}", hz)).await?;
        self.frequency_hz = hz;
        Ok(())
    }

    async fn set_power(&mut self, _dbm: f64) -> Result<()> {
        Ok(())
    }

    async fn config_summary(&mut self) -> Result<String> {
        Ok(format!(
            "{:.3}GHz_STN_{}it",
            self.frequency_hz / 1e9,
            self.iterations
        ))
    }

    async fn sweep(&mut self) -> Result<()> {
        self.vsa.write_and_wait("INIT:IMM").await
    }

    async fn marker(&mut self) -> Result<f64> {
        self.sweep().await?;
        self.vsa
            .write(&format!(":CALC:MARK1:X {:.0}", self.frequency_hz))
            .await?;
        self.vsa.query_f64(":CALC:MARK1:Y?").await
    }

    async fn close(&mut self) -> Result<()> {
        self.vsa.close().await
    }
}
