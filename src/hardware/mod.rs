//! Instrument access.
//!
//! The executor only sees [`session::InstrumentSession`]. Real benches speak
//! SCPI over TCP through [`scpi::ScpiClient`]; [`mock::MockBench`] simulates a
//! bench for tests and dry runs.

pub mod bench;
pub mod mock;
pub mod noise;
pub mod scpi;
pub mod session;
pub mod spur_search;
pub mod waveform;

pub use bench::ScpiBench;
pub use mock::MockBench;
pub use session::{InstrumentSession, SessionFactory};
