//! CLI Entry Point for rf_sweep
//!
//! Provides command-line interface for:
//! - Running a test plan against the bench (or a simulated one)
//! - Previewing the expanded execution units without touching instruments
//! - Printing the built-in default test plan
//!
//! # Usage
//!
//! Run a plan on the real bench:
//! ```bash
//! rf_sweep run --plan config/test_inputs.json
//! ```
//!
//! Dry run on the mock bench:
//! ```bash
//! rf_sweep run --mock --output-dir /tmp/rf
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rf_sweep::config::{self, AppSettings, DEFAULT_CONFIG_PATH};
use rf_sweep::experiment::{schedule, RunEngine, TestPlanDocument};
use rf_sweep::hardware::{MockBench, ScpiBench, SessionFactory};
use rf_sweep::report::ReportWriter;
use rf_sweep::tracing_init::{self, TracingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "rf_sweep")]
#[command(about = "Sequential RF measurement sweeps with normalized reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a test plan and write the reports
    Run {
        /// Test-plan document (JSON or TOML); built-in plan when omitted
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Settings file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use the simulated bench instead of the instruments
        #[arg(long)]
        mock: bool,

        /// Override the report directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Override the configured log level
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Expand a test plan and list its execution units
    Plan {
        /// Test-plan document (JSON or TOML); built-in plan when omitted
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Settings file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print the built-in default test plan
    DefaultPlan {
        /// Output format
        #[arg(long, value_enum, default_value_t = PlanFormat::Json)]
        format: PlanFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Json,
    Toml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            config,
            mock,
            output_dir,
            log_level,
        } => run(plan, config, mock, output_dir, log_level).await,
        Commands::Plan { plan, config } => print_plan(plan, config),
        Commands::DefaultPlan { format } => print_default_plan(format),
    }
}

async fn run(
    plan: Option<PathBuf>,
    config_path: PathBuf,
    mock: bool,
    output_dir: Option<PathBuf>,
    log_level: Option<String>,
) -> Result<()> {
    let settings = AppSettings::load_from(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    let mut tracing_config =
        TracingConfig::from_settings(&settings).map_err(anyhow::Error::msg)?;
    if let Some(level) = log_level {
        tracing_config.level = tracing_init::parse_log_level(&level).map_err(anyhow::Error::msg)?;
    }
    tracing_init::init(tracing_config).map_err(anyhow::Error::msg)?;

    info!(name = %settings.application.name, mock, "Starting");
    let document = config::load_test_plan(plan.as_deref());

    let factory: Arc<dyn SessionFactory> = if mock {
        Arc::new(MockBench::new())
    } else {
        Arc::new(ScpiBench::new(settings.bench.clone()))
    };
    let engine = RunEngine::new(factory, settings.sweep);
    let report = engine.run(&document).await;

    let mut writer = ReportWriter::new(&settings.output);
    if let Some(dir) = output_dir {
        writer = writer.with_directory(dir);
    }
    let paths = writer.write(&report)?;

    println!("Run {} complete", report.run_id);
    println!(
        "  results: {} ({} failed), diagnostics: {}",
        report.store.len(),
        report.store.error_count(),
        report.diagnostics.len()
    );
    for diagnostic in &report.diagnostics {
        println!("  ! {}: {}", diagnostic.family, diagnostic.message);
    }
    println!("  JSON: {}", paths.json.display());
    println!("  CSV:  {}", paths.csv.display());
    Ok(())
}

fn print_plan(plan: Option<PathBuf>, config_path: PathBuf) -> Result<()> {
    let settings = AppSettings::load_from(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    let document = config::load_test_plan(plan.as_deref());
    let schedule = schedule(&document, &settings.sweep);

    for sweep in &schedule.sweeps {
        println!(
            "{} spec #{}: {} units",
            sweep.plan.family(),
            sweep.spec_index,
            sweep.plan.len()
        );
        if let Some(advisory) = sweep.plan.advisory() {
            println!(
                "  {} range points, estimated runtime {:.0} s",
                advisory.point_count,
                advisory.estimated_runtime.as_secs_f64()
            );
        }
        for unit in sweep.plan.units(sweep.first_id) {
            match unit.power_dbm {
                Some(power) => println!(
                    "  [{}] {:.3} GHz @ {} dBm",
                    unit.sequence_id,
                    unit.frequency_ghz(),
                    power
                ),
                None => println!("  [{}] {:.3} GHz", unit.sequence_id, unit.frequency_ghz()),
            }
        }
    }
    for diagnostic in &schedule.diagnostics {
        println!(
            "rejected {} spec #{}: {}",
            diagnostic.family,
            diagnostic.spec_index.unwrap_or_default(),
            diagnostic.message
        );
    }
    println!("{} units total", schedule.unit_count());
    Ok(())
}

fn print_default_plan(format: PlanFormat) -> Result<()> {
    let document = TestPlanDocument::builtin();
    let text = match format {
        PlanFormat::Json => serde_json::to_string_pretty(&document)?,
        PlanFormat::Toml => toml::to_string_pretty(&document)?,
    };
    println!("{}", text);
    Ok(())
}
