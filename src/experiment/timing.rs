//! Per-unit operation timing.

use crate::measurement::TimingRecord;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Well-known timing keys.
pub mod keys {
    /// Generator full configuration
    pub const VSG_CONFIG: &str = "VSG_Config";
    /// Analyzer full configuration
    pub const VSA_CONFIG: &str = "VSA_Config";
    /// Frequency applied to both sessions
    pub const FREQUENCY: &str = "VSx_freq";
    /// Generator level
    pub const POWER: &str = "VSG_pwr";
    /// Configuration summary query
    pub const CONFIG_SUMMARY: &str = "VSA_get_info";
    /// Waveform acquisition
    pub const SWEEP_EVM: &str = "VSA_sweep_evm";
    /// EVM fetch
    pub const EVM: &str = "VSA_get_EVM";
    /// ACLR measurement
    pub const ACLR: &str = "VSA_get_ACLR";
    /// Channel power fetch
    pub const CHANNEL_POWER: &str = "VSA_get_chPwr";
    /// Spur-search acquisition
    pub const SWEEP_SPUR: &str = "VSA_sweep_spur";
    /// Spur list fetch
    pub const SPUR_RESULTS: &str = "get_results";
    /// Sum of all marker readings of a noise unit
    pub const MARKER: &str = "VSA_marker";

    /// Keys that make up a waveform row's test time.
    pub const WAVEFORM_TEST_TIME: [&str; 3] = [SWEEP_EVM, EVM, ACLR];
}

/// Time a future, returning its output with the elapsed duration.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = fut.await;
    (output, start.elapsed())
}

/// Accumulates the timings of one execution unit.
///
/// A timing is recorded whether the wrapped operation succeeds or fails, so a
/// failed unit still reports how far it got.
#[derive(Debug, Default)]
pub struct TimingRecorder {
    record: TimingRecord,
}

impl TimingRecorder {
    /// Fresh recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Await `fut`, record its duration under `operation`, return its output.
    pub async fn time<T, F>(&mut self, operation: &str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let (output, elapsed) = timed(fut).await;
        self.record(operation, elapsed);
        output
    }

    /// Record an externally measured duration.
    pub fn record(&mut self, operation: &str, elapsed: Duration) {
        self.record.insert(operation, elapsed.as_secs_f64());
    }

    /// Timings captured so far.
    pub fn snapshot(&self) -> &TimingRecord {
        &self.record
    }

    /// Freeze the record.
    pub fn finish(self) -> TimingRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test(start_paused = true)]
    async fn records_elapsed_time() {
        let mut recorder = TimingRecorder::new();
        let value = recorder
            .time(keys::EVM, async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(-42.5)
            })
            .await
            .unwrap();
        assert_eq!(value, -42.5);
        let record = recorder.finish();
        assert!((record.get(keys::EVM).unwrap() - 0.25).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn records_failed_operations() {
        let mut recorder = TimingRecorder::new();
        let result: anyhow::Result<f64> = recorder
            .time(keys::SWEEP_EVM, async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(anyhow!("sweep timed out"))
            })
            .await;
        assert!(result.is_err());
        assert!(recorder.snapshot().contains(keys::SWEEP_EVM));
    }
}
