//! Coordination-service node behavior
//!
//! One replica of the cluster's config-distribution service, held as a
//! behavior module over a [`Host`] handle. The service itself is an
//! external process; this module only launches it, probes it, and
//! loads the shared overlay configuration into it.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::commands::{
    CoordinatorHealth, CoordinatorLaunch, CoordinatorLoadKey, OVERLAY_CONFIG_KEY,
};
use crate::error::{MeshError, MeshResult};
use crate::host::Host;

pub struct Coordinator {
    host: Arc<dyn Host>,
    initial_cluster: String,
    work_dir: PathBuf,
}

impl Coordinator {
    pub fn new(host: Arc<dyn Host>, initial_cluster: impl Into<String>, run_dir: &Path) -> Self {
        Self {
            host,
            initial_cluster: initial_cluster.into(),
            work_dir: run_dir.to_path_buf(),
        }
    }

    pub fn name(&self) -> &str {
        self.host.name()
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.host.addr()
    }

    /// Launch the replica detached. Readiness is probed separately.
    pub async fn start(&self) -> MeshResult<()> {
        let launch = CoordinatorLaunch {
            name: self.name().to_string(),
            addr: self.addr(),
            initial_cluster: self.initial_cluster.clone(),
            data_dir: self.work_dir.join(format!("{}.etcd", self.name())),
            log_file: self.work_dir.join(format!("{}.log", self.name())),
        };
        info!(coordinator = %self.name(), "starting coordination-service replica");
        self.host.spawn(&launch.render()).await
    }

    /// Whether this replica answers health probes yet.
    pub async fn healthy(&self) -> MeshResult<bool> {
        let probe = CoordinatorHealth {
            endpoint: self.addr(),
        };
        Ok(self.host.run(&probe.render()).await?.success)
    }

    /// Load the shared overlay-network configuration from a local file
    /// into the distribution key.
    pub async fn load_overlay_config(&self, config_file: &Path) -> MeshResult<()> {
        let cmd = CoordinatorLoadKey {
            key: OVERLAY_CONFIG_KEY,
            file: config_file,
        }
        .render();
        let out = self.host.run(&cmd).await?;
        if !out.success {
            return Err(MeshError::CommandFailed {
                command: cmd,
                details: out.stderr,
            });
        }
        info!(coordinator = %self.name(), "overlay configuration loaded");
        Ok(())
    }

    /// Best-effort stop of the replica process.
    pub async fn terminate(&self) {
        let kill = format!("pkill -f 'etcd --name {}'", self.name());
        let _ = self.host.run(&kill).await;
        info!(coordinator = %self.name(), "coordinator terminated");
    }
}
