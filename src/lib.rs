//! # RF Sweep Core Library
//!
//! This crate orchestrates sequential RF measurement campaigns on a bench made
//! of a vector signal analyzer (VSA) and a vector signal generator (VSG). A
//! test-plan document lists, per measurement family, the specs to run; each
//! spec is expanded into execution units, executed one at a time, and the
//! results are written as a structured JSON document plus a flattened CSV
//! table.
//!
//! ## Crate Structure
//!
//! - **`config`**: Application settings loaded with `figment`, and the test-plan
//!   document with its built-in default.
//! - **`error`**: The `SweepError` enum for run-level failures.
//! - **`experiment`**: Spec decoding, sweep expansion, the configuration
//!   fingerprint cache, the measurement executor, and the run engine.
//! - **`hardware`**: The instrument session traits, the SCPI transport, the
//!   per-family SCPI sessions, and a mock bench.
//! - **`measurement`**: The tagged result union and the append-only store.
//! - **`report`**: Flattening and report output.
//! - **`tracing_init`**: Structured logging setup.

pub mod config;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod measurement;
pub mod report;
pub mod tracing_init;
