//! Measurement executor.
//!
//! Runs one [`ExecutionUnit`] against a family's session:
//!
//! 1. Reconfigure both instruments unless the unit's fingerprint matches the
//!    one already applied.
//! 2. Apply frequency and power (always).
//! 3. Read configuration-dependent values (negotiated resource blocks).
//! 4. Acquire and fetch the family's primary metric.
//! 5. Waveform families: ACLR if requested, otherwise channel power if
//!    requested.
//! 6. Assemble the result with the unit's timings.
//!
//! Any failure in these steps ends the unit with an error-bearing result that
//! keeps the partial measurement and timings. It never propagates further.

use super::fingerprint::{ConfigFingerprint, FingerprintCache};
use super::sweep::ExecutionUnit;
use super::timing::{keys, timed, TimingRecorder};
use crate::hardware::session::InstrumentSession;
use crate::measurement::{
    Family, MarkerReading, Measurement, MeasurementResult, NoiseMeasurement, NoiseStatistics,
    SpurMeasurement, WaveformMeasurement,
};
use anyhow::Result;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// A unit that ended in failure, carrying its error-bearing result.
#[derive(Debug, Error)]
#[error("unit {sequence_id} failed: {message}")]
pub struct UnitFailure {
    /// Sequence id of the failed unit
    pub sequence_id: u64,
    /// Failure description
    pub message: String,
    result: Box<MeasurementResult>,
}

impl UnitFailure {
    /// The error-bearing result.
    pub fn result(&self) -> &MeasurementResult {
        &self.result
    }

    /// Take the error-bearing result for the store.
    pub fn into_result(self) -> MeasurementResult {
        *self.result
    }
}

/// Executes units and owns the fingerprint cache.
#[derive(Debug, Default)]
pub struct MeasurementExecutor {
    cache: FingerprintCache,
}

impl MeasurementExecutor {
    /// Executor with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce the family about to execute; a change clears the cache.
    pub fn begin_family(&mut self, family: Family) {
        self.cache.enter_family(family);
    }

    /// Read access to the cache.
    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Run one unit to completion.
    pub async fn execute(
        &mut self,
        session: &mut dyn InstrumentSession,
        unit: &ExecutionUnit,
    ) -> std::result::Result<MeasurementResult, UnitFailure> {
        let span = info_span!("unit", sequence_id = unit.sequence_id, family = %unit.family);
        self.execute_inner(session, unit).instrument(span).await
    }

    async fn execute_inner(
        &mut self,
        session: &mut dyn InstrumentSession,
        unit: &ExecutionUnit,
    ) -> std::result::Result<MeasurementResult, UnitFailure> {
        let mut recorder = TimingRecorder::new();
        let mut measurement = initial_measurement(unit);
        let mut summary = None;

        let outcome = self
            .run_steps(session, unit, &mut recorder, &mut measurement, &mut summary)
            .await;

        let mut result = MeasurementResult {
            sequence_id: unit.sequence_id,
            config_summary: summary,
            timings: recorder.finish(),
            error: None,
            measurement,
        };

        match outcome {
            Ok(()) => {
                info!("Unit complete");
                Ok(result)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(error = %message, "Unit failed");
                // Instrument state is unknown after a failure.
                self.cache.invalidate(unit.family);
                result.error = Some(message.clone());
                Err(UnitFailure {
                    sequence_id: unit.sequence_id,
                    message,
                    result: Box::new(result),
                })
            }
        }
    }

    async fn run_steps(
        &mut self,
        session: &mut dyn InstrumentSession,
        unit: &ExecutionUnit,
        recorder: &mut TimingRecorder,
        measurement: &mut Measurement,
        summary: &mut Option<String>,
    ) -> Result<()> {
        let family = unit.family;
        self.cache.enter_family(family);

        let fingerprint = ConfigFingerprint::of(unit);
        if self.cache.needs_reconfiguration(family, &fingerprint) {
            self.cache.invalidate(family);
            debug!(?fingerprint, "Reconfiguring instruments");
            recorder
                .time(keys::VSG_CONFIG, session.configure_generator(unit))
                .await?;
            recorder
                .time(keys::VSA_CONFIG, session.configure_analyzer(unit))
                .await?;
            self.cache.store(family, fingerprint);
        } else {
            info!("Configuration unchanged, skipping reconfiguration");
        }

        recorder
            .time(keys::FREQUENCY, session.set_frequency(unit.frequency_hz))
            .await?;
        if let Some(power) = unit.power_dbm {
            recorder.time(keys::POWER, session.set_power(power)).await?;
        }

        match measurement {
            Measurement::Lte(w) | Measurement::Nr5g(w) => {
                measure_waveform(session, unit, recorder, w, summary).await
            }
            Measurement::SpurSearch(s) => measure_spurs(session, recorder, s, summary).await,
            Measurement::SubThermalNoise(n) => {
                measure_noise(session, recorder, n, summary).await
            }
        }
    }
}

/// Payload pre-filled from the unit, completed as steps succeed.
fn initial_measurement(unit: &ExecutionUnit) -> Measurement {
    let p = &unit.params;
    match unit.family {
        Family::Lte | Family::Nr5g => {
            let lte = unit.family == Family::Lte;
            let w = WaveformMeasurement {
                center_frequency_hz: unit.frequency_hz,
                power_dbm: unit.power_dbm,
                resource_blocks: p.resource_blocks,
                resource_block_offset: p.resource_block_offset,
                channel_bandwidth_mhz: p.channel_bandwidth_mhz,
                modulation: p.modulation_type.clone(),
                duplexing: lte.then(|| p.duplexing.clone()),
                link_direction: lte.then(|| p.link_direction.clone()),
                subcarrier_spacing_khz: (!lte).then_some(p.subcarrier_spacing_khz),
                evm_db: None,
                channel_power_dbm: None,
                aclr: None,
            };
            if lte {
                Measurement::Lte(w)
            } else {
                Measurement::Nr5g(w)
            }
        }
        Family::SpurSearch => Measurement::SpurSearch(SpurMeasurement {
            fundamental_frequency_hz: unit.frequency_hz,
            rbw_hz: p.rbw_mhz * 1e6,
            spur_limit_dbm: p.spur_limit_dbm,
            power_dbm: unit.power_dbm,
            spurs: Vec::new(),
            no_spurs_detected: false,
        }),
        Family::SubThermalNoise => Measurement::SubThermalNoise(NoiseMeasurement {
            center_frequency_hz: unit.frequency_hz,
            iterations: p.iterations,
            markers: Vec::new(),
            statistics: None,
        }),
    }
}

async fn measure_waveform(
    session: &mut dyn InstrumentSession,
    unit: &ExecutionUnit,
    recorder: &mut TimingRecorder,
    w: &mut WaveformMeasurement,
    summary: &mut Option<String>,
) -> Result<()> {
    // Report what the generator actually uses, not what was requested.
    if let Some(rb) = session.effective_resource_blocks().await? {
        w.resource_blocks = Some(rb);
    }
    *summary = Some(
        recorder
            .time(keys::CONFIG_SUMMARY, session.config_summary())
            .await?,
    );

    recorder.time(keys::SWEEP_EVM, session.sweep()).await?;
    w.evm_db = Some(recorder.time(keys::EVM, session.evm()).await?);

    if unit.params.measure_aclr {
        let aclr = recorder.time(keys::ACLR, session.aclr()).await?;
        w.channel_power_dbm = aclr.map(|a| a.channel_power_dbm);
        w.aclr = aclr;
    } else if unit.params.measure_ch_pwr {
        w.channel_power_dbm = Some(
            recorder
                .time(keys::CHANNEL_POWER, session.channel_power())
                .await?,
        );
    }
    Ok(())
}

async fn measure_spurs(
    session: &mut dyn InstrumentSession,
    recorder: &mut TimingRecorder,
    s: &mut SpurMeasurement,
    summary: &mut Option<String>,
) -> Result<()> {
    *summary = Some(
        recorder
            .time(keys::CONFIG_SUMMARY, session.config_summary())
            .await?,
    );
    recorder.time(keys::SWEEP_SPUR, session.sweep()).await?;
    let spurs = recorder.time(keys::SPUR_RESULTS, session.spurs()).await?;
    s.no_spurs_detected = spurs.is_empty();
    s.spurs = spurs;
    Ok(())
}

async fn measure_noise(
    session: &mut dyn InstrumentSession,
    recorder: &mut TimingRecorder,
    n: &mut NoiseMeasurement,
    summary: &mut Option<String>,
) -> Result<()> {
    *summary = Some(
        recorder
            .time(keys::CONFIG_SUMMARY, session.config_summary())
            .await?,
    );

    let mut total = Duration::ZERO;
    let mut failure = None;
    for iteration in 1..=n.iterations {
        let (reading, elapsed) = timed(session.marker()).await;
        total += elapsed;
        match reading {
            Ok(marker_dbm) => n.markers.push(MarkerReading {
                iteration,
                marker_dbm,
                meas_time_s: elapsed.as_secs_f64(),
            }),
            Err(e) => {
                failure = Some(e.context(format!("marker reading {} failed", iteration)));
                break;
            }
        }
    }
    recorder.record(keys::MARKER, total);
    n.statistics = NoiseStatistics::from_readings(&n.markers);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::spec::TestSpec;
    use crate::hardware::mock::{MockBench, MockOperation};
    use crate::hardware::session::SessionFactory;
    use crate::measurement::Spur;
    use serde_json::{json, Value};

    fn unit(family: Family, sequence_id: u64, freq_ghz: f64, entry: Value) -> ExecutionUnit {
        let spec = TestSpec::from_entry(family, &entry).unwrap();
        ExecutionUnit {
            sequence_id,
            family,
            frequency_hz: freq_ghz * 1e9,
            power_dbm: spec.power.as_ref().map(|p| p.values()[0]),
            params: spec.params,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_matching_unit_skips_reconfiguration() {
        let bench = MockBench::new();
        let mut session = bench.open(Family::Nr5g).await.unwrap();
        let mut executor = MeasurementExecutor::new();
        let entry = json!({"center_frequency_ghz": 3.5});

        let first = executor
            .execute(session.as_mut(), &unit(Family::Nr5g, 0, 3.5, entry.clone()))
            .await
            .unwrap();
        let second = executor
            .execute(session.as_mut(), &unit(Family::Nr5g, 1, 3.6, entry))
            .await
            .unwrap();

        assert!(first.timings.contains(keys::VSG_CONFIG));
        assert!(first.timings.contains(keys::VSA_CONFIG));
        assert!(!second.timings.contains(keys::VSG_CONFIG));
        assert!(!second.timings.contains(keys::VSA_CONFIG));
        assert!(second.timings.contains(keys::FREQUENCY));
        assert_eq!(bench.count(MockOperation::ConfigureGenerator).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aclr_supersedes_channel_power() {
        let bench = MockBench::new();
        let mut session = bench.open(Family::Lte).await.unwrap();
        let mut executor = MeasurementExecutor::new();

        let result = executor
            .execute(
                session.as_mut(),
                &unit(Family::Lte, 0, 6.201, json!({"center_frequency_ghz": 6.201, "channel_bandwidth_mhz": 5})),
            )
            .await
            .unwrap();

        let Measurement::Lte(w) = &result.measurement else {
            panic!("expected LTE payload");
        };
        assert_eq!(w.resource_blocks, Some(25));
        assert!(w.aclr.is_some());
        assert_eq!(w.channel_power_dbm, w.aclr.map(|a| a.channel_power_dbm));
        assert!(result.timings.contains(keys::ACLR));
        assert!(!result.timings.contains(keys::CHANNEL_POWER));
        assert_eq!(bench.count(MockOperation::ChannelPower).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_power_only_when_aclr_disabled() {
        let bench = MockBench::new();
        let mut session = bench.open(Family::Nr5g).await.unwrap();
        let mut executor = MeasurementExecutor::new();
        let result = executor
            .execute(
                session.as_mut(),
                &unit(
                    Family::Nr5g,
                    0,
                    3.5,
                    json!({"center_frequency_ghz": 3.5, "power_dbm": -12.0, "measure_aclr": false}),
                ),
            )
            .await
            .unwrap();
        let Measurement::Nr5g(w) = &result.measurement else {
            panic!("expected NR5G payload");
        };
        assert_eq!(w.channel_power_dbm, Some(-12.0));
        assert!(w.aclr.is_none());
        assert!(result.timings.contains(keys::CHANNEL_POWER));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_partial_timings_and_forces_reconfiguration() {
        let bench = MockBench::new();
        bench.fail_at(MockOperation::Evm, 3.5e9).await;
        let mut session = bench.open(Family::Nr5g).await.unwrap();
        let mut executor = MeasurementExecutor::new();
        let entry = json!({"center_frequency_ghz": 3.5});

        let failure = executor
            .execute(session.as_mut(), &unit(Family::Nr5g, 4, 3.5, entry.clone()))
            .await
            .unwrap_err();
        assert_eq!(failure.sequence_id, 4);
        assert!(failure.result().is_error());
        assert!(executor.cache().current(Family::Nr5g).is_none());
        let result = failure.into_result();
        assert!(result.is_error());
        assert!(result.timings.contains(keys::SWEEP_EVM));
        assert!(result.timings.contains(keys::EVM));
        assert!(!result.timings.contains(keys::ACLR));

        let next = executor
            .execute(session.as_mut(), &unit(Family::Nr5g, 5, 3.6, entry))
            .await
            .unwrap();
        assert!(next.timings.contains(keys::VSG_CONFIG));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_spur_search_is_marked_not_failed() {
        let bench = MockBench::new();
        bench
            .set_spurs(
                7e9,
                vec![Spur {
                    frequency_hz: 3.6e9,
                    power_dbm: -97.0,
                }],
            )
            .await;
        let mut session = bench.open(Family::SpurSearch).await.unwrap();
        let mut executor = MeasurementExecutor::new();
        let entry = |f: f64| json!({"fundamental_frequency_ghz": f});

        let clean = executor
            .execute(session.as_mut(), &unit(Family::SpurSearch, 0, 6.0, entry(6.0)))
            .await
            .unwrap();
        let dirty = executor
            .execute(session.as_mut(), &unit(Family::SpurSearch, 1, 7.0, entry(7.0)))
            .await
            .unwrap();

        let (Measurement::SpurSearch(c), Measurement::SpurSearch(d)) =
            (&clean.measurement, &dirty.measurement)
        else {
            panic!("expected spur payloads");
        };
        assert!(c.no_spurs_detected && c.spurs.is_empty());
        assert!(clean.error.is_none());
        assert!(!d.no_spurs_detected);
        assert_eq!(d.spurs.len(), 1);
        // A new fundamental means new scan ranges.
        assert!(dirty.timings.contains(keys::VSA_CONFIG));
    }

    #[tokio::test(start_paused = true)]
    async fn noise_unit_reads_each_iteration() {
        let bench = MockBench::new();
        let mut session = bench.open(Family::SubThermalNoise).await.unwrap();
        let mut executor = MeasurementExecutor::new();
        let result = executor
            .execute(
                session.as_mut(),
                &unit(Family::SubThermalNoise, 0, 6.321, json!({"center_frequency_ghz": 6.321, "iterations": 3})),
            )
            .await
            .unwrap();

        let Measurement::SubThermalNoise(n) = &result.measurement else {
            panic!("expected noise payload");
        };
        assert_eq!(n.markers.len(), 3);
        assert_eq!(n.markers[2].iteration, 3);
        let stats = n.statistics.unwrap();
        assert_eq!(stats.max_dbm, -170.0);
        assert_eq!(stats.min_dbm, -171.0);
        let marker_sum: f64 = n.markers.iter().map(|m| m.meas_time_s).sum();
        assert!((result.timings.get(keys::MARKER).unwrap() - marker_sum).abs() < 1e-9);
        assert!(!result.timings.contains(keys::POWER));
    }
}
