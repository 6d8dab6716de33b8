//! Stochastic branching-process outbreak simulators and the rejection-sampling (ABC)
//! engines that calibrate them against case-count observations.

pub mod branching;
pub mod calibration;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod household;
pub mod output;
pub mod parameters;
pub mod sampler;
pub mod sink;

pub use branching::BranchingModel;
pub use calibration::{
    AcceptanceGrid, CalibrationChain, CalibrationOutcome, ChainSample, FinalSizeTable,
    acceptance_fraction, final_size, quarantine_fraction,
};
pub use config::{GridRun, RunConfig};
pub use dispatch::dispatch_grid;
pub use error::OutbreakError;
pub use household::{HouseholdModel, HouseholdOutbreak};
pub use output::{HouseholdOutput, IncidenceTrace, Termination};
pub use parameters::{
    CalibrationSettings, FinalSizeSettings, HouseholdParameters, NuisanceRanges,
    ObservationWindow, OutbreakParameters, UniformRange,
};
pub use sink::ResultSink;
