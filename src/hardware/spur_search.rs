//! Spurious-emission search.
//!
//! The analyzer's spurious application scans a list of frequency ranges
//! around the fundamental F and its second harmonic:
//!
//! | Range | Start | Stop | Attenuation |
//! |---|---|---|---|
//! | 1 | F/2 | F - 1 MHz | 0 dB |
//! | 2 | F - 1 MHz | F + 1 MHz | 60 dB |
//! | 3 | F + 1 MHz | 2F | 0 dB |
//!
//! Range 2 straddles the carrier itself, hence the heavy attenuation.

use super::scpi::ScpiTransport;
use super::session::InstrumentSession;
use crate::experiment::sweep::ExecutionUnit;
use crate::measurement::{Family, Spur};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Guard band either side of the fundamental (Hz).
pub const CARRIER_GUARD_HZ: f64 = 1e6;

const REFERENCE_LEVEL_DBM: f64 = -40.0;
const SWEEP_POINTS: u32 = 2001;
const VALUES_PER_SPUR: usize = 6;

/// Analyzer detector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    /// Root-mean-square
    Rms,
}

impl Detector {
    fn keyword(self) -> &'static str {
        match self {
            Detector::Rms => "RMS",
        }
    }
}

/// One independently configured scan range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRange {
    /// 1-based range index on the analyzer
    pub index: u8,
    /// Start (Hz)
    pub start_hz: f64,
    /// Stop (Hz)
    pub stop_hz: f64,
    /// Resolution bandwidth (Hz)
    pub rbw_hz: f64,
    /// Detector
    pub detector: Detector,
    /// Input attenuation (dB)
    pub attenuation_db: u32,
    /// Flat limit line at start and stop (dBm)
    pub threshold_dbm: f64,
}

/// The three scan ranges for fundamental `fundamental_hz`.
pub fn spur_ranges(fundamental_hz: f64, rbw_mhz: f64, spur_limit_dbm: f64) -> [ScanRange; 3] {
    let range = |index, start_hz, stop_hz, attenuation_db| ScanRange {
        index,
        start_hz,
        stop_hz,
        rbw_hz: rbw_mhz * 1e6,
        detector: Detector::Rms,
        attenuation_db,
        threshold_dbm: spur_limit_dbm,
    };
    let below = fundamental_hz - CARRIER_GUARD_HZ;
    let above = fundamental_hz + CARRIER_GUARD_HZ;
    [
        range(1, fundamental_hz / 2.0, below, 0),
        range(2, below, above, 60),
        range(3, above, 2.0 * fundamental_hz, 0),
    ]
}

/// Parse the analyzer's spur list.
///
/// The list is a flat sequence of six-value records whose first two values are
/// frequency (Hz) and level (dBm). Parsing stops at the first malformed record.
pub fn parse_spur_list(response: &str) -> Vec<Spur> {
    let response = response.trim();
    if response.is_empty() {
        return Vec::new();
    }
    let values: Vec<&str> = response.split(',').map(str::trim).collect();
    let mut spurs = Vec::new();
    for (i, record) in values.chunks(VALUES_PER_SPUR).enumerate() {
        let parsed = match record {
            [freq, power, ..] => freq.parse::<f64>().ok().zip(power.parse::<f64>().ok()),
            _ => None,
        };
        match parsed {
            Some((frequency_hz, power_dbm)) => spurs.push(Spur {
                frequency_hz,
                power_dbm,
            }),
            None => {
                warn!("Malformed spur record at index {}: {:?}", i * VALUES_PER_SPUR, record);
                break;
            }
        }
    }
    spurs
}

/// Spur-search session.
pub struct SpurSearchSession {
    vsa: Arc<dyn ScpiTransport>,
    vsg: Arc<dyn ScpiTransport>,
    fundamental_hz: f64,
    rbw_mhz: f64,
    spur_limit_dbm: f64,
}

impl SpurSearchSession {
    /// Wrap already opened analyzer and generator transports.
    pub fn new(vsa: Arc<dyn ScpiTransport>, vsg: Arc<dyn ScpiTransport>) -> Self {
        Self {
            vsa,
            vsg,
            fundamental_hz: 6e9,
            rbw_mhz: 0.01,
            spur_limit_dbm: -95.0,
        }
    }

    async fn configure_range(&self, range: &ScanRange) -> Result<()> {
        let prefix = format!("SENS:LIST:RANG{}", range.index);
        let commands = [
            format!("{}:FREQ:STAR {:.0}", prefix, range.start_hz),
            format!("{}:FREQ:STOP {:.0}", prefix, range.stop_hz),
            format!("{}:FILT:TYPE NORM", prefix),
            format!("{}:BAND:RES {:.0}", prefix, range.rbw_hz),
            format!("{}:SWE:TIME:AUTO ON", prefix),
            format!("{}:DET {}", prefix, range.detector.keyword()),
            format!("{}:RLEV {}", prefix, REFERENCE_LEVEL_DBM),
            format!("{}:INP:ATT:AUTO OFF", prefix),
            format!("{}:INP:ATT {}", prefix, range.attenuation_db),
            format!("{}:POIN:VAL {}", prefix, SWEEP_POINTS),
            format!("{}:BRE OFF", prefix),
            format!("{}:POW:NCOR ON", prefix),
            format!("{}:THR:STAR {:.2}", prefix, range.threshold_dbm),
            format!("{}:THR:STOP {:.2}", prefix, range.threshold_dbm),
            format!("{}:BAND:AUTO OFF", prefix),
        ];
        for command in &commands {
            self.vsa.write(command).await?;
        }
        info!(
            "Range {}: {:.3}-{:.3} GHz",
            range.index,
            range.start_hz / 1e9,
            range.stop_hz / 1e9
        );
        Ok(())
    }
}

#[async_trait]
impl InstrumentSession for SpurSearchSession {
    fn family(&self) -> Family {
        Family::SpurSearch
    }

    async fn configure_generator(&mut self, unit: &ExecutionUnit) -> Result<()> {
        let power = unit.power_dbm.unwrap_or(-70.0);
        self.vsg.write("*RST").await?;
        self.vsg
            .write(&format!("SOUR:FREQ:CW {:.0}", unit.frequency_hz))
            .await?;
        self.vsg
            .write(&format!("SOUR:POW:LEV:IMM:AMPL {:.2}", power))
            .await?;
        self.vsg.write("OUTP:STAT ON").await?;
        info!(
            "VSG set: frequency={:.3} GHz, power={:.2} dBm",
            unit.frequency_ghz(),
            power
        );
        Ok(())
    }

    async fn configure_analyzer(&mut self, unit: &ExecutionUnit) -> Result<()> {
        self.fundamental_hz = unit.frequency_hz;
        self.rbw_mhz = unit.params.rbw_mhz;
        self.spur_limit_dbm = unit.params.spur_limit_dbm;

        self.vsa.write_and_wait("*RST").await?;
        self.vsa.write(":INIT:SPUR").await?;
        self.vsa.write("INIT:CONT OFF").await?;
        for range in spur_ranges(self.fundamental_hz, self.rbw_mhz, self.spur_limit_dbm) {
            self.configure_range(&range).await?;
        }
        self.vsa.write_and_wait(":SENS:LIST:XADJ").await?;
        info!("Spur detection table configured");
        Ok(())
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.vsa.write(&format!("SENS:FREQ:CENT {:.0}", hz)).await?;
        self.vsg.write(&format!("SOUR:FREQ:CW {:.0}", hz)).await?;
        Ok(())
    }

    async fn set_power(&mut self, dbm: f64) -> Result<()> {
        self.vsg
            .write(&format!("SOUR:POW:LEV:IMM:AMPL {:.2}", dbm))
            .await
    }

    async fn config_summary(&mut self) -> Result<String> {
        Ok(format!(
            "{:.3}GHz_Spur_RBW{:.3}MHz_Limit{:.2}dBm",
            self.fundamental_hz / 1e9,
            self.rbw_mhz,
            self.spur_limit_dbm
        ))
    }

    async fn sweep(&mut self) -> Result<()> {
        self.vsa.write(":INIT:CONT OFF").await?;
        self.vsa.write_and_wait("INIT:IMM").await?;
        info!("Spur search measurement completed");
        Ok(())
    }

    async fn spurs(&mut self) -> Result<Vec<Spur>> {
        let response = self.vsa.query("TRAC3:DATA? LIST").await?;
        let spurs = parse_spur_list(&response);
        if spurs.is_empty() {
            info!("No spurs detected");
        }
        for spur in &spurs {
            info!(
                "Spur: {:.6} GHz, {:.2} dBm",
                spur.frequency_hz / 1e9,
                spur.power_dbm
            );
        }
        Ok(spurs)
    }

    async fn close(&mut self) -> Result<()> {
        let vsa = self.vsa.close().await;
        let output_off = self.vsg.write("OUTP:STAT OFF").await;
        let vsg = self.vsg.close().await;
        vsa.and(output_off).and(vsg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::scpi::MockScpiTransport;

    #[test]
    fn ranges_bracket_fundamental_and_harmonic() {
        let [low, carrier, high] = spur_ranges(6e9, 0.01, -95.0);
        assert_eq!((low.start_hz, low.stop_hz), (3e9, 6e9 - 1e6));
        assert_eq!((carrier.start_hz, carrier.stop_hz), (6e9 - 1e6, 6e9 + 1e6));
        assert_eq!((high.start_hz, high.stop_hz), (6e9 + 1e6, 12e9));
        assert_eq!(carrier.attenuation_db, 60);
        for range in [low, carrier, high] {
            assert_eq!(range.detector, Detector::Rms);
            assert_eq!(range.threshold_dbm, -95.0);
            assert!((range.rbw_hz - 1e4).abs() < 1e-6);
        }
    }

    #[test]
    fn spur_list_takes_first_two_values_of_each_record() {
        let spurs = parse_spur_list("3.1e9,-97.5,0,0,0,0,7.2e9,-99.1,0,0,0,0");
        assert_eq!(spurs.len(), 2);
        assert_eq!(spurs[1].frequency_hz, 7.2e9);
        assert_eq!(spurs[1].power_dbm, -99.1);
    }

    #[test]
    fn spur_list_stops_at_malformed_record() {
        let spurs = parse_spur_list("3.1e9,-97.5,0,0,0,0,bad,-99.1,0,0,0,0,8e9,-96,0,0,0,0");
        assert_eq!(spurs.len(), 1);
        assert!(parse_spur_list("").is_empty());
        assert!(parse_spur_list("3.1e9").is_empty());
    }

    #[tokio::test]
    async fn analyzer_setup_adjusts_ranges_before_sweeping() {
        let vsa = MockScpiTransport::new();
        let mut session =
            SpurSearchSession::new(Arc::new(vsa.clone()), Arc::new(MockScpiTransport::new()));
        let unit = ExecutionUnit {
            sequence_id: 0,
            family: Family::SpurSearch,
            frequency_hz: 6e9,
            power_dbm: Some(-10.0),
            params: crate::experiment::spec::TestSpec::from_entry(
                Family::SpurSearch,
                &serde_json::json!({"fundamental_frequency_ghz": 6.0}),
            )
            .unwrap()
            .params,
        };
        session.configure_analyzer(&unit).await.unwrap();
        session.sweep().await.unwrap();

        let log = vsa.log().await;
        let xadj = log.iter().position(|c| c == ":SENS:LIST:XADJ;*OPC?").unwrap();
        let sweep = log.iter().position(|c| c == "INIT:IMM;*OPC?").unwrap();
        assert!(log.contains(&"SENS:LIST:RANG2:INP:ATT 60".to_string()));
        assert!(log.contains(&"SENS:LIST:RANG3:THR:STOP -95.00".to_string()));
        assert!(xadj < sweep);
        assert_eq!(
            session.config_summary().await.unwrap(),
            "6.000GHz_Spur_RBW0.010MHz_Limit-95.00dBm"
        );
    }

    #[tokio::test]
    async fn close_switches_generator_output_off() {
        let vsg = MockScpiTransport::new();
        let mut session =
            SpurSearchSession::new(Arc::new(MockScpiTransport::new()), Arc::new(vsg.clone()));
        session.close().await.unwrap();
        assert_eq!(vsg.log().await, vec!["OUTP:STAT OFF", "<close>"]);
    }
}
