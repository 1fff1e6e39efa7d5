//! Mock bench for running sweeps without hardware.
//!
//! All mock operations use async-safe waits (`tokio::time::sleep`), so tests
//! can run on a paused clock. Faults can be injected per operation, either
//! everywhere or only while the bench is tuned to a given frequency.
//!
//! # Simulated readings
//!
//! - EVM: -45 dB, 0.1 dB worse per dBm of generator level above -10 dBm
//! - Channel power: the generator level
//! - LTE resource blocks: 25 at 5 MHz, 100 otherwise
//! - Markers: around -170 dBm, cycling in 0.5 dB steps

use super::session::{InstrumentSession, SessionFactory};
use crate::experiment::sweep::ExecutionUnit;
use crate::measurement::{AclrReading, Family, Spur};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Operations that can be observed or made to fail.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    ConfigureGenerator,
    ConfigureAnalyzer,
    SetFrequency,
    SetPower,
    ConfigSummary,
    Sweep,
    Evm,
    Aclr,
    ChannelPower,
    Spurs,
    Marker,
    Close,
}

/// One recorded session call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Session family
    pub family: Family,
    /// Operation performed
    pub operation: MockOperation,
    /// Frequency the bench was tuned to (Hz)
    pub frequency_hz: f64,
}

#[derive(Default)]
struct BenchState {
    calls: Vec<MockCall>,
    faults: Vec<(MockOperation, Option<u64>)>,
    failing_families: HashSet<Family>,
    spurs: HashMap<u64, Vec<Spur>>,
    malformed_aclr: bool,
}

/// Frequencies are compared at 1 Hz resolution.
fn freq_key(hz: f64) -> u64 {
    hz.round() as u64
}

/// Simulated bench; opens one [`MockSession`] per family.
#[derive(Clone)]
pub struct MockBench {
    state: Arc<Mutex<BenchState>>,
    latency: Duration,
}

impl Default for MockBench {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBench {
    /// Bench with 5 ms per operation.
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(5))
    }

    /// Bench with a custom per-operation latency.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BenchState::default())),
            latency,
        }
    }

    /// Make `operation` fail on every call.
    pub async fn fail(&self, operation: MockOperation) {
        self.state.lock().await.faults.push((operation, None));
    }

    /// Make `operation` fail while tuned to `frequency_hz`.
    pub async fn fail_at(&self, operation: MockOperation, frequency_hz: f64) {
        self.state
            .lock()
            .await
            .faults
            .push((operation, Some(freq_key(frequency_hz))));
    }

    /// Refuse to open sessions for `family`.
    pub async fn fail_open(&self, family: Family) {
        self.state.lock().await.failing_families.insert(family);
    }

    /// Report `spurs` when searching around `fundamental_hz`.
    pub async fn set_spurs(&self, fundamental_hz: f64, spurs: Vec<Spur>) {
        self.state
            .lock()
            .await
            .spurs
            .insert(freq_key(fundamental_hz), spurs);
    }

    /// Return a readout ACLR cannot be parsed from.
    pub async fn set_malformed_aclr(&self, malformed: bool) {
        self.state.lock().await.malformed_aclr = malformed;
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls of `operation`.
    pub async fn count(&self, operation: MockOperation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

#[async_trait]
impl SessionFactory for MockBench {
    async fn open(&self, family: Family) -> Result<Box<dyn InstrumentSession>> {
        sleep(self.latency).await;
        if self.state.lock().await.failing_families.contains(&family) {
            return Err(anyhow!("Mock {} instruments not responding", family));
        }
        tracing::info!("Opened mock {} session", family);
        Ok(Box::new(MockSession {
            family,
            bench: self.clone(),
            frequency_hz: 0.0,
            power_dbm: -10.0,
            bandwidth_mhz: 20,
            requested_rb: None,
            iterations: 10,
            markers_read: 0,
        }))
    }
}

/// Simulated session for one family.
pub struct MockSession {
    family: Family,
    bench: MockBench,
    frequency_hz: f64,
    power_dbm: f64,
    bandwidth_mhz: u32,
    requested_rb: Option<u32>,
    iterations: u32,
    markers_read: u32,
}

impl MockSession {
    /// Record the call, wait the simulated latency, apply injected faults.
    async fn step(&self, operation: MockOperation) -> Result<()> {
        sleep(self.bench.latency).await;
        let mut state = self.bench.state.lock().await;
        state.calls.push(MockCall {
            family: self.family,
            operation,
            frequency_hz: self.frequency_hz,
        });
        let here = freq_key(self.frequency_hz);
        let faulted = state
            .faults
            .iter()
            .any(|(op, at)| *op == operation && at.map_or(true, |f| f == here));
        if faulted {
            return Err(anyhow!(
                "Injected {:?} failure at {:.3} GHz",
                operation,
                self.frequency_hz / 1e9
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InstrumentSession for MockSession {
    fn family(&self) -> Family {
        self.family
    }

    async fn configure_generator(&mut self, unit: &ExecutionUnit) -> Result<()> {
        self.frequency_hz = unit.frequency_hz;
        self.bandwidth_mhz = unit.params.channel_bandwidth_mhz;
        self.requested_rb = unit.params.resource_blocks;
        self.step(MockOperation::ConfigureGenerator).await
    }

    async fn configure_analyzer(&mut self, unit: &ExecutionUnit) -> Result<()> {
        self.frequency_hz = unit.frequency_hz;
        self.iterations = unit.params.iterations;
        self.step(MockOperation::ConfigureAnalyzer).await
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.frequency_hz = hz;
        self.step(MockOperation::SetFrequency).await
    }

    async fn set_power(&mut self, dbm: f64) -> Result<()> {
        self.power_dbm = dbm;
        self.step(MockOperation::SetPower).await
    }

    async fn effective_resource_blocks(&mut self) -> Result<Option<u32>> {
        Ok(match self.family {
            Family::Lte => Some(if self.bandwidth_mhz == 5 { 25 } else { 100 }),
            Family::Nr5g => self.requested_rb,
            _ => None,
        })
    }

    async fn config_summary(&mut self) -> Result<String> {
        self.step(MockOperation::ConfigSummary).await?;
        Ok(format!("{:.3}GHz_{}_MOCK", self.frequency_hz / 1e9, self.family))
    }

    async fn sweep(&mut self) -> Result<()> {
        self.step(MockOperation::Sweep).await
    }

    async fn evm(&mut self) -> Result<f64> {
        self.family_check(&[Family::Lte, Family::Nr5g], "EVM")?;
        self.step(MockOperation::Evm).await?;
        Ok(-45.0 + 0.1 * (self.power_dbm + 10.0))
    }

    async fn aclr(&mut self) -> Result<Option<AclrReading>> {
        self.family_check(&[Family::Lte, Family::Nr5g], "ACLR")?;
        self.step(MockOperation::Aclr).await?;
        if self.bench.state.lock().await.malformed_aclr {
            return Ok(AclrReading::parse("-10.0,-45.0"));
        }
        Ok(Some(AclrReading {
            channel_power_dbm: self.power_dbm,
            adjacent_lower_db: -45.2,
            adjacent_upper_db: -45.6,
            alternate_lower_db: -60.1,
            alternate_upper_db: -60.3,
        }))
    }

    async fn channel_power(&mut self) -> Result<f64> {
        self.family_check(&[Family::Lte, Family::Nr5g], "channel power")?;
        self.step(MockOperation::ChannelPower).await?;
        Ok(self.power_dbm)
    }

    async fn spurs(&mut self) -> Result<Vec<Spur>> {
        self.family_check(&[Family::SpurSearch], "spurs")?;
        self.step(MockOperation::Spurs).await?;
        let state = self.bench.state.lock().await;
        Ok(state
            .spurs
            .get(&freq_key(self.frequency_hz))
            .cloned()
            .unwrap_or_default())
    }

    async fn marker(&mut self) -> Result<f64> {
        self.family_check(&[Family::SubThermalNoise], "markers")?;
        self.step(MockOperation::Marker).await?;
        let reading = -170.0 - 0.5 * f64::from(self.markers_read % 3);
        self.markers_read += 1;
        Ok(reading)
    }

    async fn close(&mut self) -> Result<()> {
        self.step(MockOperation::Close).await
    }
}

impl MockSession {
    fn family_check(&self, families: &[Family], what: &str) -> Result<()> {
        if families.contains(&self.family) {
            Ok(())
        } else {
            Err(anyhow!("{} session does not measure {}", self.family, what))
        }
    }
}
