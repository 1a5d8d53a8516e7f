//! Test support shared by HealthCrew crates.

pub mod log;

pub use log::{ScenarioLog, TestPhase, init_global_test_logging};
