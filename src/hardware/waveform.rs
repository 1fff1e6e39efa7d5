//! LTE and 5G NR (FR1) signal-quality sessions.
//!
//! Both families drive a vector signal generator with a standard-conformant
//! uplink waveform and measure it with the analyzer's matching application.

use super::scpi::ScpiTransport;
use super::session::InstrumentSession;
use crate::experiment::sweep::ExecutionUnit;
use crate::measurement::{AclrReading, Family};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Carrier layout shared by both standards, captured at configuration time.
#[derive(Debug, Clone, PartialEq)]
struct Carrier {
    frequency_hz: f64,
    power_dbm: f64,
    resource_blocks: Option<u32>,
    resource_block_offset: u32,
    bandwidth_mhz: u32,
    modulation: String,
    subcarrier_spacing_khz: u32,
    duplexing: String,
    link_direction: String,
}

impl Carrier {
    fn from_unit(unit: &ExecutionUnit) -> Self {
        let p = &unit.params;
        Self {
            frequency_hz: unit.frequency_hz,
            power_dbm: unit.power_dbm.unwrap_or(-10.0),
            resource_blocks: p.resource_blocks,
            resource_block_offset: p.resource_block_offset,
            bandwidth_mhz: p.channel_bandwidth_mhz,
            modulation: p.modulation_type.clone(),
            subcarrier_spacing_khz: p.subcarrier_spacing_khz,
            duplexing: p.duplexing.clone(),
            link_direction: p.link_direction.clone(),
        }
    }

    /// Generator-side link keyword.
    fn generator_link(&self) -> &'static str {
        if self.link_direction.eq_ignore_ascii_case("DL") {
            "DOWN"
        } else {
            "UP"
        }
    }
}

impl Default for Carrier {
    fn default() -> Self {
        Self {
            frequency_hz: 6e9,
            power_dbm: -10.0,
            resource_blocks: None,
            resource_block_offset: 0,
            bandwidth_mhz: 20,
            modulation: "QAM256".into(),
            subcarrier_spacing_khz: 30,
            duplexing: "FDD".into(),
            link_direction: "UL".into(),
        }
    }
}

/// LTE bandwidth keyword; unsupported widths fall back to 20 MHz.
fn lte_bandwidth(mhz: u32) -> &'static str {
    match mhz {
        5 => "BW5_00",
        _ => "BW20_00",
    }
}

/// ACLR readout helper shared by both standards.
async fn read_aclr(vsa: &dyn ScpiTransport) -> Result<Option<AclrReading>> {
    let response = vsa.query(":CALC:MARK:FUNC:POW:RES? ACP").await?;
    let reading = AclrReading::parse(&response);
    if reading.is_none() {
        tracing::warn!("Malformed ACLR readout: {:?}", response);
    }
    Ok(reading)
}

// =============================================================================
// LTE
// =============================================================================

/// LTE uplink session.
pub struct LteSession {
    vsa: Arc<dyn ScpiTransport>,
    vsg: Arc<dyn ScpiTransport>,
    carrier: Carrier,
    negotiated_rb: Option<u32>,
}

impl LteSession {
    /// Wrap already opened analyzer and generator transports.
    pub fn new(vsa: Arc<dyn ScpiTransport>, vsg: Arc<dyn ScpiTransport>) -> Self {
        Self {
            vsa,
            vsg,
            carrier: Carrier::default(),
            negotiated_rb: None,
        }
    }
}

#[async_trait]
impl InstrumentSession for LteSession {
    fn family(&self) -> Family {
        Family::Lte
    }

    async fn configure_generator(&mut self, unit: &ExecutionUnit) -> Result<()> {
        self.carrier = Carrier::from_unit(unit);
        let c = &self.carrier;
        info!("Configuring VSG for LTE");

        self.vsg.write_and_wait("*RST").await?;
        self.vsg.write(&format!(":SOUR:FREQ:CW {}", c.frequency_hz)).await?;
        self.vsg.write(":SOUR1:BB:EUTR:STDM LTE").await?;
        self.vsg.write(&format!(":SOUR1:BB:EUTR:DUPL {}", c.duplexing)).await?;
        self.vsg
            .write(&format!(":SOUR1:BB:EUTR:LINK {}", c.generator_link()))
            .await?;
        self.vsg
            .write(&format!(":SOUR1:BB:EUTR:UL:BW {}", lte_bandwidth(c.bandwidth_mhz)))
            .await?;

        // The generator decides the RB count for the chosen bandwidth.
        let rb = self.vsg.query_u32(":SOURce1:BB:EUTRa:UL:NORB?").await?;
        info!("Queried resource blocks: {}", rb);
        self.negotiated_rb = Some(rb);

        self.vsg
            .write(&format!(":SOUR1:BB:EUTR:UL:CELL0:SUBF0:ALL0:PUSC:SET1:RBC {}", rb))
            .await?;
        self.vsg
            .write(&format!(
                ":SOUR1:BB:EUTR:UL:CELL0:SUBF0:ALL0:PUSC:SET1:VRB {}",
                c.resource_block_offset
            ))
            .await?;
        self.vsg
            .write(&format!(
                ":SOUR1:BB:EUTR:UL:CELL0:SUBF0:ALL0:CW1:PUSC:MOD {}",
                c.modulation
            ))
            .await?;
        self.vsg.write(":SOUR1:BB:EUTR:STAT 1").await?;
        self.vsg
            .write_and_wait(&format!(":SOUR1:POW:LEV:IMM:AMPL {}", c.power_dbm))
            .await?;
        self.vsg.write(":OUTP1:STAT 1").await?;
        self.vsg.write_and_wait(":SOUR1:CORR:OPT:EVM 1").await?;
        self.vsg.write(":SOUR1:BB:EUTR:TRIG:OUTP1:MODE REST").await?;
        Ok(())
    }

    async fn configure_analyzer(&mut self, unit: &ExecutionUnit) -> Result<()> {
        let c = Carrier::from_unit(unit);
        info!("Configuring VSA for LTE");

        self.vsa.write_and_wait("*RST").await?;
        self.vsa.write_and_wait(":INST:SEL \"LTE\"").await?;
        self.vsa.write(&format!(":SENS:FREQ:CENT {}", c.frequency_hz)).await?;
        self.vsa.write(":INP:ATT:AUTO OFF").await?;
        self.vsa.write(":INP:ATT 10").await?;
        self.vsa.write(":TRIG:SEQ:SOUR EXT").await?;
        self.vsa.write(&format!(":CONF:LTE:LDIR {}", c.link_direction)).await?;
        self.vsa.write(&format!(":CONF:LTE:DUPL {}", c.duplexing)).await?;
        self.vsa
            .write(&format!(":CONF:LTE:UL:CC:BW {}", lte_bandwidth(c.bandwidth_mhz)))
            .await?;
        self.vsa
            .write(&format!(":CONF:LTE:UL:CC:SUBF2:ALL:MOD {}", c.modulation))
            .await?;
        if c.modulation == "QPSK" {
            self.vsa.write(":SENS:LTE:FRAM:SSUB OFF").await?;
            info!("Single subframe analysis disabled for QPSK");
        } else {
            self.vsa.write(":SENS:LTE:FRAM:SSUB ON").await?;
        }
        self.vsa.write(":UNIT:EVM DB").await?;
        self.vsa.write("INIT:CONT OFF").await?;
        Ok(())
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.vsa.write(&format!(":SENS:FREQ:CENT {}", hz)).await?;
        self.vsg.write(&format!(":SOUR:FREQ:CW {}", hz)).await?;
        self.carrier.frequency_hz = hz;
        Ok(())
    }

    async fn set_power(&mut self, dbm: f64) -> Result<()> {
        self.vsg
            .write_and_wait(&format!(":SOUR1:POW:LEV:IMM:AMPL {}", dbm))
            .await?;
        self.carrier.power_dbm = dbm;
        Ok(())
    }

    async fn effective_resource_blocks(&mut self) -> Result<Option<u32>> {
        Ok(self.negotiated_rb.or(self.carrier.resource_blocks))
    }

    async fn config_summary(&mut self) -> Result<String> {
        let c = &self.carrier;
        let rb = self
            .negotiated_rb
            .or(c.resource_blocks)
            .map_or_else(|| "?".to_string(), |rb| rb.to_string());
        Ok(format!(
            "{:.3}GHz_{}MHz_{}_{}_15kHz_{}RB_{}RBO_{}",
            c.frequency_hz / 1e9,
            c.bandwidth_mhz,
            c.duplexing,
            c.link_direction,
            rb,
            c.resource_block_offset,
            c.modulation
        ))
    }

    async fn sweep(&mut self) -> Result<()> {
        self.vsa.write("INIT:CONT OFF").await?;
        self.vsa.write_and_wait("INIT:IMM").await
    }

    async fn evm(&mut self) -> Result<f64> {
        let evm = self.vsa.query_f64(":FETC:CC1:SUMM:EVM:ALL:AVER?").await?;
        info!("EVM measured: {:.2} dB", evm);
        Ok(evm)
    }

    async fn aclr(&mut self) -> Result<Option<AclrReading>> {
        self.vsa.write(":CONF:LTE:MEAS ACLR").await?;
        self.vsa
            .write(&format!(":SENS:FREQ:CENT {}", self.carrier.frequency_hz))
            .await?;
        self.sweep().await?;
        let reading = read_aclr(self.vsa.as_ref()).await;
        // Leave the analyzer in EVM mode even when the readout failed.
        self.vsa.write(":CONF:LTE:MEAS EVM").await?;
        reading
    }

    async fn channel_power(&mut self) -> Result<f64> {
        self.vsa.query_f64(":FETC:CC1:SUMM:POW:AVER?").await
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing VSA and VSG connections");
        let vsa = self.vsa.close().await;
        let vsg = self.vsg.close().await;
        vsa.and(vsg)
    }
}

// =============================================================================
// NR5G
// =============================================================================

/// 5G NR FR1 uplink session.
pub struct Nr5gSession {
    vsa: Arc<dyn ScpiTransport>,
    vsg: Arc<dyn ScpiTransport>,
    carrier: Carrier,
    sweep_time_s: f64,
}

impl Nr5gSession {
    /// Wrap already opened analyzer and generator transports.
    pub fn new(vsa: Arc<dyn ScpiTransport>, vsg: Arc<dyn ScpiTransport>) -> Self {
        Self {
            vsa,
            vsg,
            carrier: Carrier::default(),
            sweep_time_s: 0.015,
        }
    }
}

#[async_trait]
impl InstrumentSession for Nr5gSession {
    fn family(&self) -> Family {
        Family::Nr5g
    }

    async fn configure_generator(&mut self, unit: &ExecutionUnit) -> Result<()> {
        self.carrier = Carrier::from_unit(unit);
        let c = &self.carrier;
        let rb = c.resource_blocks.unwrap_or(51);
        info!("Configuring VSG for 5G NR");

        let qcks = ":SOUR1:BB:NR5G:QCKS:GEN";
        self.vsg
            .write(&format!(":SOUR1:BB:NR5G:LINK {}", c.generator_link()))
            .await?;
        self.vsg.write(&format!("{}:DUPL {}", qcks, c.duplexing)).await?;
        self.vsg.write(&format!("{}:CARD FR1GT3", qcks)).await?;
        self.vsg.write(&format!("{}:CBW BW{}", qcks, c.bandwidth_mhz)).await?;
        self.vsg
            .write(&format!("{}:SCSP SCS{}", qcks, c.subcarrier_spacing_khz))
            .await?;
        self.vsg.write(&format!("{}:ES:MOD {}", qcks, c.modulation)).await?;
        self.vsg.write(&format!("{}:ES:RBN {}", qcks, rb)).await?;
        self.vsg
            .write(&format!("{}:ES:RBOF {}", qcks, c.resource_block_offset))
            .await?;
        self.vsg.write(":SOUR1:BB:NR5G:QCKS:APPL").await?;
        self.vsg.write(":SOUR1:BB:NR5G:STAT 1").await?;
        self.vsg.write(":OUTP1:STAT 1").await?;
        self.vsg.write_and_wait(":SOUR1:CORR:OPT:EVM 1").await?;
        self.vsg.write(":SOUR1:BB:NR5G:TRIG:OUTP1:MODE REST").await?;
        self.vsg.write(":SOUR1:BB:NR5G:NODE:RFPH:MODE 0").await?;
        self.vsg.write(&format!(":SOUR1:POW:POW {}", c.power_dbm)).await?;
        self.vsg.write_and_wait(&format!(":SOUR:FREQ:CW {}", c.frequency_hz)).await?;
        Ok(())
    }

    async fn configure_analyzer(&mut self, unit: &ExecutionUnit) -> Result<()> {
        let c = Carrier::from_unit(unit);
        info!("Configuring VSA for 5G NR");

        self.vsa.write_and_wait("*RST").await?;
        self.vsa.write_and_wait(":INST:CRE:NEW NR5G, \"5G NR\"").await?;
        self.vsa.write(&format!("SENS:FREQ:CENT {}", c.frequency_hz)).await?;
        self.vsa.write(":INP:ATT:AUTO OFF").await?;
        self.vsa.write(":INP:ATT 10").await?;
        self.vsa.write(":TRIG:SEQ:SOUR EXT").await?;
        self.vsa.write(":TRIG:EXT:DEL 0").await?;
        self.vsa.write(":SENS:NR5G:FRAM:COUN:AUTO OFF").await?;
        self.vsa.write(":SENS:NR5G:FRAM:COUN 1").await?;
        self.vsa.write(":SENS:NR5G:FRAM:SLOT 1").await?;
        self.vsa.write(":UNIT:EVM DB").await?;
        self.vsa
            .write(&format!(":SENS:SWE:TIME {}", self.sweep_time_s))
            .await?;
        self.vsa.write(":CONF:NR5G:MEAS EVM").await?;
        self.vsa.write("INIT:CONT OFF").await?;
        Ok(())
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.vsa.write(&format!(":SENS:FREQ:CENT {}", hz)).await?;
        self.vsg.write(&format!(":SOUR:FREQ:CW {}", hz)).await?;
        self.carrier.frequency_hz = hz;
        Ok(())
    }

    async fn set_power(&mut self, dbm: f64) -> Result<()> {
        self.vsg.write(&format!(":SOUR1:POW:POW {}", dbm)).await?;
        self.carrier.power_dbm = dbm;
        Ok(())
    }

    async fn effective_resource_blocks(&mut self) -> Result<Option<u32>> {
        Ok(self.carrier.resource_blocks)
    }

    async fn config_summary(&mut self) -> Result<String> {
        let c = &self.carrier;
        Ok(format!(
            "{:.3}GHz_{}MHz_{}kHz_{}RB_{}RBO_{}",
            c.frequency_hz / 1e9,
            c.bandwidth_mhz,
            c.subcarrier_spacing_khz,
            c.resource_blocks.unwrap_or(51),
            c.resource_block_offset,
            c.modulation
        ))
    }

    async fn sweep(&mut self) -> Result<()> {
        self.vsa.write("INIT:CONT OFF").await?;
        // First acquisition settles the trigger; the second is measured.
        self.vsa.write_and_wait("INIT:IMM").await?;
        self.vsa.write_and_wait("INIT:IMM").await
    }

    async fn evm(&mut self) -> Result<f64> {
        let evm = self.vsa.query_f64(":FETC:CC1:SUMM:EVM:ALL:AVER?").await?;
        info!("EVM measured: {:.2} dB", evm);
        Ok(evm)
    }

    async fn aclr(&mut self) -> Result<Option<AclrReading>> {
        self.vsa.write(":CONF:NR5G:MEAS ACLR").await?;
        self.vsa
            .write(&format!(":SENS:FREQ:CENT {}", self.carrier.frequency_hz))
            .await?;
        self.vsa.write(":SENS:POW:ACH:ACP 2").await?;
        self.sweep().await?;
        let reading = read_aclr(self.vsa.as_ref()).await;
        self.vsa.write(":CONF:NR5G:MEAS EVM").await?;
        reading
    }

    async fn channel_power(&mut self) -> Result<f64> {
        let power = self.vsa.query_f64(":CALC:NR5G:CHP?").await?;
        info!("Channel power measured: {:.2} dBm", power);
        Ok(power)
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing VSA and VSG connections");
        let vsa = self.vsa.close().await;
        let vsg = self.vsg.close().await;
        vsa.and(vsg)
    }
}
