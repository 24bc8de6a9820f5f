//! Kubernetes operator for ARK: Survival Ascended server clusters.
//!
//! An `ArkCluster` resource declares a set of maps sharing a data volume
//! and a blue/green pair of install volumes. The operator keeps one server
//! pod per map running against the active install, watches upstream for
//! server and mod updates, installs them onto the standby volume and rolls
//! the fleet over with RCON-announced restarts.

pub mod api;
pub mod backoff;
pub mod cli;
pub mod config;
pub mod console;
pub mod context;
pub mod controllers;
pub mod crd;
pub mod queue;
pub mod reconcile;
pub mod resources;
pub mod rollout;
pub mod start;
pub mod volumes;
