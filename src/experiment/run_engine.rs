//! RunEngine for executing a test-plan document.
//!
//! The engine processes families in a fixed order, expands every enabled spec
//! into a sweep, and feeds the units one at a time to the
//! [`MeasurementExecutor`]. Nothing runs concurrently: the instrument sessions
//! are single-owner resources and SCPI allows one outstanding command.
//!
//! # Failure scopes
//!
//! | Failure | Effect |
//! |---|---|
//! | malformed spec | diagnostic, that spec is skipped before any instrument contact |
//! | session cannot be opened | diagnostic, the family's remaining units are skipped |
//! | unit step fails | error-bearing result, the sweep continues |
//! | session close fails | logged only |
//!
//! ```text
//! TestPlanDocument → schedule() → SweepPlan* → units → executor → ResultStore
//! ```

use super::executor::MeasurementExecutor;
use super::spec::{TestPlanDocument, TestSpec};
use super::sweep::SweepPlan;
use crate::config::SweepSettings;
use crate::error::SweepError;
use crate::hardware::session::{InstrumentSession, SessionFactory};
use crate::measurement::{Family, ResultStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Kind of run-level problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A spec could not be decoded or expanded
    Configuration,
    /// A family's instrument session could not be opened
    FamilyInit,
}

/// Run-level problem surfaced in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostic {
    /// What went wrong
    pub kind: DiagnosticKind,
    /// Affected family
    pub family: Family,
    /// Index of the spec in the family's list, when spec-scoped
    pub spec_index: Option<usize>,
    /// Description
    pub message: String,
}

impl RunDiagnostic {
    fn from_error(family: Family, spec_index: Option<usize>, err: &SweepError) -> Self {
        let kind = if err.is_spec_scoped() {
            DiagnosticKind::Configuration
        } else {
            DiagnosticKind::FamilyInit
        };
        Self {
            kind,
            family,
            spec_index,
            message: err.to_string(),
        }
    }
}

/// An expanded spec with its position in the run.
#[derive(Debug, Clone)]
pub struct ScheduledSweep {
    /// Index of the spec in its family's list
    pub spec_index: usize,
    /// Sequence id of the sweep's first unit
    pub first_id: u64,
    /// The expansion
    pub plan: SweepPlan,
}

/// Every sweep of a run, in execution order, plus the specs that were rejected.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Sweeps in execution order
    pub sweeps: Vec<ScheduledSweep>,
    /// Configuration diagnostics
    pub diagnostics: Vec<RunDiagnostic>,
}

impl Schedule {
    /// Total number of execution units.
    pub fn unit_count(&self) -> usize {
        self.sweeps.iter().map(|s| s.plan.len()).sum()
    }
}

/// Decode and expand every enabled spec without touching an instrument.
///
/// Sequence ids are assigned from one counter shared by all families.
pub fn schedule(document: &TestPlanDocument, settings: &SweepSettings) -> Schedule {
    let mut out = Schedule::default();
    let mut next_id = 0u64;

    for family in Family::RUN_ORDER {
        for (index, entry) in document.entries(family).iter().enumerate() {
            let expanded = TestSpec::from_entry(family, entry).and_then(|spec| {
                if spec.run {
                    SweepPlan::expand(&spec, settings).map(Some)
                } else {
                    Ok(None)
                }
            });
            match expanded {
                Ok(Some(plan)) => {
                    let first_id = next_id;
                    next_id += plan.len() as u64;
                    out.sweeps.push(ScheduledSweep {
                        spec_index: index,
                        first_id,
                        plan,
                    });
                }
                Ok(None) => debug!(%family, index, "Spec disabled, skipping"),
                Err(e) => {
                    warn!(%family, index, error = %e, "Rejected test spec");
                    out.diagnostics
                        .push(RunDiagnostic::from_error(family, Some(index), &e));
                }
            }
        }
    }
    out
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end, after cleanup
    pub finished_at: DateTime<Utc>,
    /// Every unit result in completion order
    pub store: ResultStore,
    /// Configuration and family-initialisation problems
    pub diagnostics: Vec<RunDiagnostic>,
}

/// Sequential executor for a whole test-plan document.
pub struct RunEngine {
    factory: Arc<dyn SessionFactory>,
    settings: SweepSettings,
}

impl RunEngine {
    /// Create an engine that opens sessions through `factory`.
    pub fn new(factory: Arc<dyn SessionFactory>, settings: SweepSettings) -> Self {
        Self { factory, settings }
    }

    /// Execute every enabled spec of `document`.
    ///
    /// Always returns a report; failures are recorded, not raised.
    pub async fn run(&self, document: &TestPlanDocument) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let Schedule {
            sweeps,
            mut diagnostics,
        } = schedule(document, &self.settings);
        info!(%run_id, sweeps = sweeps.len(), "Starting run");

        let mut executor = MeasurementExecutor::new();
        let mut store = ResultStore::new();
        let mut sessions: BTreeMap<Family, Box<dyn InstrumentSession>> = BTreeMap::new();
        let mut failed_families: HashSet<Family> = HashSet::new();

        for sweep in &sweeps {
            let family = sweep.plan.family();
            if failed_families.contains(&family) {
                debug!(%family, spec = sweep.spec_index, "Family unavailable, skipping sweep");
                continue;
            }

            if !sessions.contains_key(&family) {
                match self.factory.open(family).await {
                    Ok(session) => {
                        sessions.insert(family, session);
                    }
                    Err(e) => {
                        let err = SweepError::FamilyInit {
                            family,
                            message: format!("{:#}", e),
                        };
                        error!(%family, error = %err, "Aborting family");
                        diagnostics.push(RunDiagnostic::from_error(family, None, &err));
                        failed_families.insert(family);
                        continue;
                    }
                }
            }
            let Some(session) = sessions.get_mut(&family) else {
                continue;
            };

            executor.begin_family(family);
            info!(%family, spec = sweep.spec_index, units = sweep.plan.len(), "Running sweep");
            for unit in sweep.plan.units(sweep.first_id) {
                let result = match executor.execute(session.as_mut(), &unit).await {
                    Ok(result) => result,
                    Err(failure) => failure.into_result(),
                };
                store.append(result);
            }
        }

        close_sessions(sessions).await;

        info!(
            %run_id,
            results = store.len(),
            errors = store.error_count(),
            diagnostics = diagnostics.len(),
            "Run complete"
        );
        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            store,
            diagnostics,
        }
    }
}

/// Best-effort release of every opened session.
async fn close_sessions(sessions: BTreeMap<Family, Box<dyn InstrumentSession>>) {
    for (family, mut session) in sessions {
        match session.close().await {
            Ok(()) => debug!(%family, "Session closed"),
            Err(e) => error!(%family, error = %format!("{:#}", e), "Failed to close session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockBench, MockOperation};
    use serde_json::json;

    fn document(value: serde_json::Value) -> TestPlanDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn schedule_shares_sequence_counter_across_families() {
        let doc = document(json!({
            "lte": [{"run": true, "center_frequency_ghz": [6.0, 6.1], "power_dbm": [-10, -5]}],
            "nr5g": [{"run": false, "center_frequency_ghz": 3.5}],
            "STN": [{"run": true, "center_frequency_ghz": 6.3}],
            "spur_search": [{"run": true, "fundamental_frequency_ghz": 6.0}]
        }));
        let schedule = schedule(&doc, &SweepSettings::default());
        let firsts: Vec<u64> = schedule.sweeps.iter().map(|s| s.first_id).collect();
        assert_eq!(firsts, vec![0, 4, 5]);
        assert_eq!(schedule.unit_count(), 6);
        assert!(schedule.diagnostics.is_empty());
    }

    #[test]
    fn malformed_spec_does_not_block_siblings() {
        let doc = document(json!({
            "STN": [
                {"run": true, "center_frequency_ghz": {"range": {"start_ghz": 6.2, "stop_ghz": 6.0, "step_mhz": 100}}},
                {"run": true, "center_frequency_ghz": 6.3}
            ]
        }));
        let schedule = schedule(&doc, &SweepSettings::default());
        assert_eq!(schedule.sweeps.len(), 1);
        assert_eq!(schedule.sweeps[0].spec_index, 1);
        assert_eq!(schedule.diagnostics.len(), 1);
        assert_eq!(schedule.diagnostics[0].kind, DiagnosticKind::Configuration);
        assert_eq!(schedule.diagnostics[0].spec_index, Some(0));
    }

    #[test]
    fn oversized_range_is_rejected_without_blocking_siblings() {
        let doc = document(json!({
            "STN": [
                {"run": true, "center_frequency_ghz": {"range": {"start_ghz": 6.0, "stop_ghz": 6.2, "step_mhz": 1e-300}}},
                {"run": true, "center_frequency_ghz": 6.3}
            ]
        }));
        let schedule = schedule(&doc, &SweepSettings::default());
        assert_eq!(schedule.unit_count(), 1);
        assert_eq!(schedule.sweeps[0].spec_index, 1);
        assert_eq!(schedule.diagnostics.len(), 1);
        assert_eq!(schedule.diagnostics[0].kind, DiagnosticKind::Configuration);
        assert!(schedule.diagnostics[0].message.contains("exceeds"));
    }

    #[tokio::test(start_paused = true)]
    async fn family_init_failure_skips_only_that_family() {
        let bench = MockBench::new();
        bench.fail_open(Family::Lte).await;
        let engine = RunEngine::new(Arc::new(bench.clone()), SweepSettings::default());

        let report = engine.run(&TestPlanDocument::builtin()).await;

        assert!(report.store.by_family(Family::Lte).next().is_none());
        assert_eq!(report.store.by_family(Family::SubThermalNoise).count(), 1);
        assert_eq!(report.store.by_family(Family::SpurSearch).count(), 1);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::FamilyInit);
        // Both opened sessions were released.
        assert_eq!(bench.count(MockOperation::Close).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_failures_do_not_lose_results() {
        let bench = MockBench::new();
        bench.fail(MockOperation::Close).await;
        let engine = RunEngine::new(Arc::new(bench.clone()), SweepSettings::default());

        let report = engine.run(&TestPlanDocument::builtin()).await;
        assert_eq!(report.store.len(), 3);
        assert_eq!(report.store.error_count(), 0);
        assert_eq!(bench.count(MockOperation::Close).await, 3);
    }
}
