//! Cluster lifecycle and cross-worker orchestration
//!
//! A `Cluster` is a named group of workers sharing one coordination
//! pair and one overlay subnet range. It derives the globally-unique
//! names for every topology element, drives the strictly-ordered
//! startup sequence, resolves containers to owning workers, and
//! programs VIP rules cluster-wide.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use tracing::{info, warn};

use crate::commands;
use crate::coordinator::Coordinator;
use crate::error::{MeshError, MeshResult};
use crate::host::Host;
use crate::router::RemoteSite;
use crate::vip::VipRule;
use crate::worker::Worker;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const COORDINATOR_DEADLINE: Duration = Duration::from_secs(10);
const PROPAGATION_DEADLINE: Duration = Duration::from_secs(15);

/// The ordered steps of cluster startup. Any failure aborts the whole
/// sequence; the step is carried in the error so the caller can decide
/// whether to tear down and retry from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStep {
    CoordinatorLaunch,
    CoordinatorReady,
    OverlayConfigLoad,
    WorkerBind,
    OverlayLaunch,
    OverlayPropagation,
    WorkerPrepare,
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StartupStep::CoordinatorLaunch => "coordinator-launch",
            StartupStep::CoordinatorReady => "coordinator-ready",
            StartupStep::OverlayConfigLoad => "overlay-config-load",
            StartupStep::WorkerBind => "worker-bind",
            StartupStep::OverlayLaunch => "overlay-launch",
            StartupStep::OverlayPropagation => "overlay-propagation",
            StartupStep::WorkerPrepare => "worker-prepare",
        };
        f.write_str(s)
    }
}

/// Poll a readiness probe at a fixed interval until it reports true or
/// the deadline passes. Replaces fixed settle delays with an explicit
/// bounded wait.
async fn poll_until<F, Fut>(interval: Duration, deadline: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if probe().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

pub struct Cluster {
    name: String,
    prefix: Ipv4Net,
    planned_workers: Vec<String>,
    coordinators: Vec<Coordinator>,
    workers: Vec<Arc<Worker>>,
    overlay_config: PathBuf,
    run_dir: PathBuf,
}

impl Cluster {
    /// Declare a cluster: records the planned worker names and the
    /// address range, nothing is live yet. `overlay_config` is the
    /// JSON file loaded into the coordination service at startup.
    pub fn new(
        name: impl Into<String>,
        num_workers: usize,
        prefix: Ipv4Net,
        overlay_config: PathBuf,
        run_dir: PathBuf,
    ) -> Self {
        let name = name.into();
        let planned_workers = (1..=num_workers)
            .map(|i| format!("C{}w{}", name, i))
            .collect();
        Self {
            name,
            prefix,
            planned_workers,
            coordinators: Vec::new(),
            workers: Vec::new(),
            overlay_config,
            run_dir,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global name for a topology element of this cluster. Two distinct
    /// clusters can never collide on the derived name, which is what
    /// lets them share one emulated fabric.
    pub fn derive_name(&self, item: &str) -> String {
        format!("C{}{}", self.name, item)
    }

    pub fn planned_workers(&self) -> &[String] {
        &self.planned_workers
    }

    pub fn coordinator_names(&self) -> [String; 2] {
        [self.derive_name("e1"), self.derive_name("e2")]
    }

    /// Fixed addresses for the coordination pair: the first two host
    /// addresses of this cluster's range, referenced before the nodes
    /// exist.
    pub fn coordinator_addrs(&self) -> [Ipv4Addr; 2] {
        let base = u32::from(self.prefix.network());
        [Ipv4Addr::from(base + 1), Ipv4Addr::from(base + 2)]
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    fn step_err(&self, step: StartupStep, details: impl Into<String>) -> MeshError {
        MeshError::ClusterStartupFailed {
            cluster: self.name.clone(),
            step: step.to_string(),
            details: details.into(),
        }
    }

    /// Bring the cluster up, strictly ordered: launch the coordination
    /// pair, wait until healthy, load the overlay config, bind the
    /// planned workers to live hosts (one-shot), launch overlay agents,
    /// wait for config propagation, then prepare each worker's
    /// attachment descriptor and NAT chain.
    pub async fn startup(
        &mut self,
        coordinator_hosts: Vec<Arc<dyn Host>>,
        worker_hosts: Vec<Arc<dyn Host>>,
    ) -> MeshResult<()> {
        info!(cluster = %self.name, "cluster startup");

        // Step 1: launch the coordination pair.
        if coordinator_hosts.len() != 2 {
            return Err(self.step_err(
                StartupStep::CoordinatorLaunch,
                format!("expected 2 coordination hosts, got {}", coordinator_hosts.len()),
            ));
        }
        let members: Vec<(String, Ipv4Addr)> = coordinator_hosts
            .iter()
            .map(|h| (h.name().to_string(), h.addr()))
            .collect();
        let initial = commands::initial_cluster(&members);
        self.coordinators = coordinator_hosts
            .into_iter()
            .map(|h| Coordinator::new(h, initial.clone(), &self.run_dir))
            .collect();
        for c in &self.coordinators {
            c.start()
                .await
                .map_err(|e| self.step_err(StartupStep::CoordinatorLaunch, e.to_string()))?;
        }

        // Step 2: wait for both replicas to answer health probes.
        for c in &self.coordinators {
            let ready = poll_until(POLL_INTERVAL, COORDINATOR_DEADLINE, move || async move {
                c.healthy().await.unwrap_or(false)
            })
            .await;
            if !ready {
                return Err(self.step_err(
                    StartupStep::CoordinatorReady,
                    format!("replica '{}' never became healthy", c.name()),
                ));
            }
        }

        // Step 3: load the shared overlay configuration.
        self.coordinators[0]
            .load_overlay_config(&self.overlay_config)
            .await
            .map_err(|e| self.step_err(StartupStep::OverlayConfigLoad, e.to_string()))?;

        // Step 4: bind planned worker names to live hosts, exactly once.
        if !self.workers.is_empty() {
            return Err(self.step_err(StartupStep::WorkerBind, "workers already bound"));
        }
        if worker_hosts.len() != self.planned_workers.len() {
            return Err(self.step_err(
                StartupStep::WorkerBind,
                format!(
                    "expected {} worker hosts, got {}",
                    self.planned_workers.len(),
                    worker_hosts.len()
                ),
            ));
        }
        let coordinator_addr = self.coordinators[0].addr();
        for (host, planned) in worker_hosts.into_iter().zip(&self.planned_workers) {
            if host.name() != planned {
                return Err(self.step_err(
                    StartupStep::WorkerBind,
                    format!("host '{}' does not match planned worker '{}'", host.name(), planned),
                ));
            }
            let worker = Worker::new(host, self.name.clone(), coordinator_addr, &self.run_dir)
                .map_err(|e| self.step_err(StartupStep::WorkerBind, e.to_string()))?;
            self.workers.push(Arc::new(worker));
        }

        // Step 5: launch overlay agents.
        for w in &self.workers {
            w.bootstrap_overlay()
                .await
                .map_err(|e| self.step_err(StartupStep::OverlayLaunch, e.to_string()))?;
        }

        // Step 6: wait until the overlay config is visible from every worker.
        for w in &self.workers {
            let w = w.as_ref();
            let visible = poll_until(POLL_INTERVAL, PROPAGATION_DEADLINE, move || async move {
                w.overlay_config_visible().await.unwrap_or(false)
            })
            .await;
            if !visible {
                return Err(self.step_err(
                    StartupStep::OverlayPropagation,
                    format!("overlay config never became visible on '{}'", w.name()),
                ));
            }
        }

        // Step 7: per-worker attachment descriptor and NAT chain.
        for w in &self.workers {
            w.write_attachment_descriptor()
                .await
                .map_err(|e| self.step_err(StartupStep::WorkerPrepare, e.to_string()))?;
            w.setup_load_balance_chain()
                .await
                .map_err(|e| self.step_err(StartupStep::WorkerPrepare, e.to_string()))?;
        }

        info!(cluster = %self.name, workers = self.workers.len(), "cluster started");
        Ok(())
    }

    /// Resolve a worker by its short name (e.g. `w1`).
    pub fn resolve(&self, name: &str) -> MeshResult<&Arc<Worker>> {
        let derived = self.derive_name(name);
        self.workers
            .iter()
            .find(|w| w.name() == derived)
            .ok_or_else(|| MeshError::WorkerNotFound { name: derived })
    }

    /// Program a round-robin VIP rule on every worker. All backends are
    /// resolved to live addresses before any rule is applied, so the
    /// rule never mixes pre- and post-mutation registry state; any
    /// unresolved backend aborts the whole operation.
    pub async fn apply_vip(&self, vip: Ipv4Addr, containers: &[&str]) -> MeshResult<VipRule> {
        let mut backends = Vec::with_capacity(containers.len());
        for name in containers {
            let mut resolved = None;
            for w in &self.workers {
                if w.owns(name).await {
                    resolved = Some(w.container_addr(name).await?);
                    break;
                }
            }
            match resolved {
                Some(addr) => backends.push(addr),
                None => {
                    return Err(MeshError::PartialResolution {
                        vip: vip.to_string(),
                        container: name.to_string(),
                    })
                }
            }
        }

        let rule = VipRule::new(vip, backends)?;
        let text = rule.render();
        info!(cluster = %self.name, rule = %text, "applying VIP rule");

        // Every worker forwards identically, wherever traffic originates.
        for w in &self.workers {
            w.apply_nat_rule(&text).await?;
        }
        Ok(rule)
    }

    /// This cluster as seen from other clusters' routers.
    pub fn mesh_site(&self) -> MeshResult<RemoteSite> {
        let first = self.workers.first().ok_or_else(|| {
            MeshError::ConfigError(format!("cluster '{}' has no bound workers", self.name))
        })?;
        Ok(RemoteSite {
            name: self.name.clone(),
            host: first.addr().to_string(),
        })
    }

    /// Tear everything down: containers before workers, workers before
    /// coordinators. Best-effort throughout.
    pub async fn terminate(&mut self) {
        for w in &self.workers {
            w.terminate().await;
        }
        for c in &self.coordinators {
            c.terminate().await;
        }
        if self.workers.is_empty() {
            warn!(cluster = %self.name, "terminate called before workers were bound");
        }
        info!(cluster = %self.name, "cluster terminated");
    }
}
