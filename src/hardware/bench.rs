//! Bench wiring for the real instruments.

use super::noise::NoiseSession;
use super::scpi::{ScpiClient, ScpiTransport};
use super::session::{InstrumentSession, SessionFactory};
use super::spur_search::SpurSearchSession;
use super::waveform::{LteSession, Nr5gSession};
use crate::config::BenchSettings;
use crate::measurement::Family;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Opens SCPI connections to the analyzer and generator for each family.
pub struct ScpiBench {
    settings: BenchSettings,
}

impl ScpiBench {
    /// Bench using the configured instrument addresses.
    pub fn new(settings: BenchSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self, role: &str, host: &str, port: u16) -> Result<Arc<dyn ScpiTransport>> {
        let client = ScpiClient::connect(host, port, self.settings.timeout_ms)
            .await
            .with_context(|| format!("{} unreachable", role))?;
        let identity = client
            .query("*IDN?")
            .await
            .with_context(|| format!("{} did not identify itself", role))?;
        info!("{} at {}: {}", role, client.peer(), identity);
        Ok(Arc::new(client))
    }

    async fn analyzer(&self) -> Result<Arc<dyn ScpiTransport>> {
        self.connect("VSA", &self.settings.vsa_host, self.settings.vsa_port)
            .await
    }

    async fn generator(&self) -> Result<Arc<dyn ScpiTransport>> {
        self.connect("VSG", &self.settings.vsg_host, self.settings.vsg_port)
            .await
    }
}

#[async_trait]
impl SessionFactory for ScpiBench {
    async fn open(&self, family: Family) -> Result<Box<dyn InstrumentSession>> {
        let vsa = self.analyzer().await?;
        let session: Box<dyn InstrumentSession> = match family {
            Family::Lte => Box::new(LteSession::new(vsa, self.generator().await?)),
            Family::Nr5g => Box::new(Nr5gSession::new(vsa, self.generator().await?)),
            Family::SpurSearch => Box::new(SpurSearchSession::new(vsa, self.generator().await?)),
            Family::SubThermalNoise => Box::new(NoiseSession::new(vsa)),
        };
        Ok(session)
    }
}
