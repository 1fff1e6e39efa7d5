//! Configuration using Figment.
//!
//! Application settings are merged from, in order:
//! 1. built-in defaults
//! 2. a TOML file (`config/rf_sweep.toml` by default)
//! 3. environment variables prefixed with `RF_SWEEP_`, sections separated by
//!    a double underscore
//!
//! The test-plan document is loaded separately by [`load_test_plan`] and falls
//! back to [`TestPlanDocument::builtin`] when it is missing or unreadable.
//!
//! # Example
//! ```no_run
//! use rf_sweep::config::AppSettings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // RF_SWEEP_APPLICATION__LOG_LEVEL=debug overrides the file
//! let settings = AppSettings::load()?;
//! println!("Analyzer: {}:{}", settings.bench.vsa_host, settings.bench.vsa_port);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, SweepError};
use crate::experiment::spec::TestPlanDocument;
use crate::hardware::scpi::{DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default settings file location
pub const DEFAULT_CONFIG_PATH: &str = "config/rf_sweep.toml";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Instrument addresses
    #[serde(default)]
    pub bench: BenchSettings,
    /// Report output
    #[serde(default)]
    pub output: OutputSettings,
    /// Sweep expansion
    #[serde(default)]
    pub sweep: SweepSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "RF Sweep".to_string(),
            log_level: "info".to_string(),
            log_format: default_log_format(),
        }
    }
}

/// Analyzer (VSA) and generator (VSG) addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchSettings {
    /// Analyzer host
    pub vsa_host: String,
    /// Analyzer SCPI port
    #[serde(default = "default_port")]
    pub vsa_port: u16,
    /// Generator host
    pub vsg_host: String,
    /// Generator SCPI port
    #[serde(default = "default_port")]
    pub vsg_port: u16,
    /// Connect and response timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            vsa_host: "192.168.200.20".to_string(),
            vsa_port: DEFAULT_PORT,
            vsg_host: "192.168.200.10".to_string(),
            vsg_port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Report output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory the reports are written to
    pub directory: PathBuf,
    /// Structured report file name
    pub json_file: String,
    /// Tabular report file name
    pub csv_file: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            json_file: "measurement_results.json".to_string(),
            csv_file: "measurement_results.csv".to_string(),
        }
    }
}

/// Sweep expansion settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Range point count above which a runtime advisory is logged
    pub advisory_threshold: usize,
    /// Estimated seconds per point and iteration
    pub unit_time_s: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            advisory_threshold: 100,
            unit_time_s: 1.0,
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl AppSettings {
    /// Load settings from the default file and the environment
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RF_SWEEP_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(SweepError::configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }
        let format = self.application.log_format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(SweepError::configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            )));
        }
        if self.bench.vsa_port == 0 || self.bench.vsg_port == 0 {
            return Err(SweepError::configuration("Instrument ports must be non-zero"));
        }
        if self.output.json_file.trim().is_empty() || self.output.csv_file.trim().is_empty() {
            return Err(SweepError::configuration("Report file names must not be empty"));
        }
        if !self.sweep.unit_time_s.is_finite() || self.sweep.unit_time_s < 0.0 {
            return Err(SweepError::configuration(format!(
                "Invalid unit_time_s {}. Must be a finite, non-negative number",
                self.sweep.unit_time_s
            )));
        }
        Ok(())
    }
}

/// Read a test-plan document (JSON for `.json`, TOML otherwise).
pub fn read_test_plan(path: &Path) -> AppResult<TestPlanDocument> {
    if !path.is_file() {
        return Err(SweepError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("test plan not found: {}", path.display()),
        )));
    }
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Figment::from(Json::file(path)),
        _ => Figment::from(Toml::file(path)),
    };
    Ok(figment.extract()?)
}

/// Load the test plan, falling back to the built-in document.
///
/// Never fails: a missing or unreadable document is logged and replaced.
pub fn load_test_plan(path: Option<&Path>) -> TestPlanDocument {
    let Some(path) = path else {
        info!("No test plan given, using built-in default plan");
        return TestPlanDocument::builtin();
    };
    match read_test_plan(path) {
        Ok(document) => {
            info!(path = %path.display(), specs = document.len(), "Loaded test plan");
            document
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Test plan unreadable, using built-in default plan");
            TestPlanDocument::builtin()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Family;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = AppSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sweep.advisory_threshold, 100);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut settings = AppSettings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[bench]\nvsa_host = \"10.0.0.5\"\nvsg_host = \"10.0.0.6\"\n\n[sweep]\nadvisory_threshold = 50\nunit_time_s = 2.5"
        )
        .unwrap();

        let settings = AppSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.bench.vsa_host, "10.0.0.5");
        assert_eq!(settings.bench.vsa_port, DEFAULT_PORT);
        assert_eq!(settings.sweep.advisory_threshold, 50);
        assert_eq!(settings.output.csv_file, "measurement_results.csv");
    }

    #[test]
    fn infinite_unit_time_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sweep]\nunit_time_s = inf").unwrap();

        let err = AppSettings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("unit_time_s"));
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let settings = AppSettings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.application.name, "RF Sweep");
    }

    #[test]
    fn json_and_toml_plans_load() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            json,
            r#"{{"nr5g": [{{"run": true, "center_frequency_ghz": [3.5, 3.6]}}], "stn": []}}"#
        )
        .unwrap();
        let doc = load_test_plan(Some(json.path()));
        assert_eq!(doc.entries(Family::Nr5g).len(), 1);
        assert!(doc.entries(Family::Lte).is_empty());

        let mut toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            toml,
            "[[spur_search]]\nrun = true\nfundamental_frequency_ghz = 6.0\n"
        )
        .unwrap();
        let doc = load_test_plan(Some(toml.path()));
        assert_eq!(doc.entries(Family::SpurSearch).len(), 1);
    }

    #[test]
    fn unreadable_plan_falls_back_to_builtin() {
        let mut broken = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(broken, "{{ not json").unwrap();
        assert_eq!(load_test_plan(Some(broken.path())), TestPlanDocument::builtin());
        assert_eq!(
            load_test_plan(Some(Path::new("missing/plan.json"))),
            TestPlanDocument::builtin()
        );
        assert_eq!(load_test_plan(None), TestPlanDocument::builtin());
    }
}
