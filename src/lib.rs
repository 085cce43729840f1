//! Piraeus Operator
//!
//! A Kubernetes operator deploying and managing LINSTOR clusters: the LINSTOR
//! controller, one satellite per storage node, node properties and storage
//! pools.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Reconcilers                                │
//! │  ┌──────────────────────┐           ┌─────────────────────────────┐  │
//! │  │   LinstorCluster     │──────────▶│      LinstorSatellite       │  │
//! │  │ controller, nodes    │  one per  │ DaemonSet, node lifecycle   │  │
//! │  └──────────┬───────────┘   node    └──────────────┬──────────────┘  │
//! │             │                                      │                 │
//! │  ┌──────────┴──────────────────────────────────────┴──────────────┐  │
//! │  │  Manifests  ─▶  Patch Engine  ─▶  Server-side apply            │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Property Resolver │ Storage Pool Model │ Validation                 │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                 LINSTOR REST client (cached, rate limited)           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Reconcilers, node lifecycle, backoff and metrics
//! - [`crd`]: Custom Resource Definitions
//! - [`patch`]: Strategic merge and JSON patches on generated resources
//! - [`properties`]: LINSTOR node properties from Kubernetes node fields
//! - [`linstor`]: LINSTOR controller client
//! - [`manifests`]: Generated controller and satellite resources
//! - [`validation`]: Admission checks
//! - [`server`]: Probe and metrics endpoints

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod linstor;
pub mod manifests;
pub mod patch;
pub mod properties;
pub mod server;
pub mod validation;

pub use config::OperatorConfig;

pub use controller::{Context, LifecycleOutcome, LifecyclePhase, Metrics, NodeLifecycle};

pub use crd::{
    LinstorCluster, LinstorClusterSpec, LinstorSatellite, LinstorSatelliteConfiguration,
    LinstorSatelliteConfigurationSpec, LinstorSatelliteSpec, LinstorStoragePool,
};

pub use error::{Error, ErrorAction, Result};

pub use linstor::{Connections, LinstorClient, StorageController};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
