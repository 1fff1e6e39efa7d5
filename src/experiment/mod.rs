//! Test-plan interpretation and execution.
//!
//! - [`spec`]: test specifications and the test-plan document
//! - [`sweep`]: expansion of a spec into execution units
//! - [`fingerprint`]: reconfiguration skipping
//! - [`timing`]: per-operation timing
//! - [`executor`]: runs one unit against an instrument session
//! - [`run_engine`]: runs a whole document and collects results

pub mod executor;
pub mod fingerprint;
pub mod run_engine;
pub mod spec;
pub mod sweep;
pub mod timing;

pub use executor::{MeasurementExecutor, UnitFailure};
pub use fingerprint::{ConfigFingerprint, FingerprintCache};
pub use run_engine::{schedule, DiagnosticKind, RunDiagnostic, RunEngine, RunReport, Schedule};
pub use spec::{FrequencyParam, PowerParam, RangeDescriptor, TestParameters, TestPlanDocument, TestSpec};
pub use sweep::{ExecutionUnit, RuntimeAdvisory, SweepPlan};
pub use timing::TimingRecorder;
