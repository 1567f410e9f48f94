//! Risk Engine (spec §4.G): position sizing, leverage governor, kill-switch
//! ladder, correlation adjustment, composed into one ordered pipeline.

pub mod correlation;
pub mod kill_switch;
pub mod leverage;
pub mod pipeline;
pub mod sizing;

pub use leverage::LeverageGovernor;
pub use pipeline::{PipelineConfig, PipelineInputs, SizedEntry, evaluate_entry};
