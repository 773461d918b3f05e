//! meshsim-core: container network lifecycle and multi-cluster service
//! routing for an emulated fabric.
//!
//! The crate tracks container namespaces per worker, sequences cluster
//! startup over an external coordination service and overlay agent,
//! programs round-robin DNAT rules for virtual service IPs, and
//! generates per-cluster service-mesh router configurations. The
//! emulation substrate is reached exclusively through the [`host::Host`]
//! trait.

pub mod cluster;
pub mod commands;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod ingress;
pub mod registry;
pub mod router;
pub mod vip;
pub mod worker;

pub use cluster::{Cluster, StartupStep};
pub use coordinator::Coordinator;
pub use error::{MeshError, MeshResult};
pub use host::{CommandOutput, Host, ShellHost};
pub use registry::ContainerRegistry;
pub use router::{RemoteSite, RouterConfigBuilder, ServiceSpec};
pub use vip::VipRule;
pub use worker::Worker;
