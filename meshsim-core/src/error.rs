//! Error types for meshsim operations
//!
//! The variants split into precondition violations (duplicate/missing
//! containers and workers, out-of-order bootstrap), operation failures
//! surfaced from external tools, and infrastructure errors (io,
//! serialization). Precondition violations abort the calling operation
//! without partial mutation; teardown paths log and continue instead of
//! returning these.

use thiserror::Error;

/// Error type for all meshsim-core operations
#[derive(Error, Debug)]
pub enum MeshError {
    // Registry preconditions
    #[error("Container already exists: {name}")]
    DuplicateContainer { name: String },

    #[error("Container not found: {name}")]
    ContainerNotFound { name: String },

    #[error("Worker not found: {name}")]
    WorkerNotFound { name: String },

    // Lifecycle ordering
    #[error("Overlay network not ready on worker '{worker}'")]
    OverlayNotReady { worker: String },

    #[error("Failed to attach container '{container}' to overlay: {details}")]
    AttachFailed { container: String, details: String },

    // VIP path
    #[error("VIP {vip} resolution failed: no worker owns container '{container}'")]
    PartialResolution { vip: String, container: String },

    // Cluster startup
    #[error("Cluster '{cluster}' startup failed at step '{step}': {details}")]
    ClusterStartupFailed {
        cluster: String,
        step: String,
        details: String,
    },

    // External tool invocation
    #[error("Command '{command}' failed: {details}")]
    CommandFailed { command: String, details: String },

    // Infrastructure
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type MeshResult<T> = Result<T, MeshError>;
