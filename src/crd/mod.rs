//! Custom Resource Definitions for the Piraeus Operator
//!
//! This module contains all CRD types:
//! - LinstorCluster: cluster-wide controller configuration
//! - LinstorSatellite: desired state of one storage node
//! - LinstorSatelliteConfiguration: configuration shared by matching nodes

pub mod common;
pub mod linstor_cluster;
pub mod linstor_satellite;
pub mod satellite_configuration;
pub mod storage_pool;

pub use common::*;
pub use linstor_cluster::*;
pub use linstor_satellite::*;
pub use satellite_configuration::*;
pub use storage_pool::*;
