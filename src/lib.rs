//! Framework extensions for experiment runs: a multi-process worker launcher,
//! an experiment plugin registry, config dict helpers, source snapshots and
//! sequence poolings.

pub mod demo;
pub mod dict;
pub mod distributed;
pub mod nn;
pub mod plugin;
pub mod snapshot;
