//! Simulation harness
//!
//! A simulated network element plus an end-to-end simulation runner used
//! by the CLI and the test suites.

mod simulator;

pub use simulator::{
    run_simulation, SimulatedElement, SimulationConfig, SimulationReport,
};
