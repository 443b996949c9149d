//! Experiment plugin units, looked up by the name of their directory.

mod error;
mod registry;
mod unit;

pub use error::{PluginErr, Result};
pub use registry::PluginRegistry;
pub use unit::{
    EXPERIMENT, Experiment, ExperimentCtor, PluginUnit, RUNNER, Runner, RunnerCtor, Symbol,
};
