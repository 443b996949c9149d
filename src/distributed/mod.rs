//! Distributed execution: parameter resolution, devices, rendezvous and the worker launcher.

mod cohort;
mod config;
mod device;
mod error;
mod launcher;
mod params;
pub mod rendezvous;

pub use cohort::{EntryPoint, WorkerCohort};
pub use config::{ConfigErr, LauncherConfig};
pub use device::{DeviceBackend, HostDevices};
pub use error::{LaunchErr, Result};
pub use launcher::{Launch, Launcher};
pub use params::{
    CUDA_VISIBLE_DEVICES, DistributedParams, EnvSource, LOCAL_RANK, MASTER_ADDR, MASTER_PORT,
    ProcessEnv, RANK, WORLD_SIZE,
};
pub use rendezvous::ProcessGroup;
