//! Scenario orchestrator
//!
//! Replays a [`Scenario`] against live hosts: brings every cluster up
//! in declaration order, places containers, programs VIPs, emits the
//! per-cluster router configs, and tears the fabric down again.

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use meshsim_core::{Cluster, Host, RouterConfigBuilder, ShellHost};

use crate::scenario::{ClusterDef, Scenario};

pub struct Orchestrator {
    scenario: Scenario,
    clusters: Vec<Cluster>,
}

fn coordinator_hosts(cluster: &Cluster) -> Vec<Arc<dyn Host>> {
    cluster
        .coordinator_names()
        .into_iter()
        .zip(cluster.coordinator_addrs())
        .map(|(name, addr)| Arc::new(ShellHost::new(name, addr)) as Arc<dyn Host>)
        .collect()
}

fn worker_hosts(cluster: &Cluster, def: &ClusterDef) -> Vec<Arc<dyn Host>> {
    let base = u32::from(def.prefix.network());
    cluster
        .planned_workers()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            // Worker addresses follow the coordination pair in the range.
            let addr = Ipv4Addr::from(base + 3 + i as u32);
            Arc::new(ShellHost::new(name.clone(), addr)) as Arc<dyn Host>
        })
        .collect()
}

impl Orchestrator {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            clusters: Vec::new(),
        }
    }

    fn build_cluster(&self, def: &ClusterDef) -> Cluster {
        Cluster::new(
            def.name.clone(),
            def.workers,
            def.prefix,
            self.scenario.overlay_config.clone(),
            self.scenario.run_dir.clone(),
        )
    }

    fn cluster(&self, name: &str) -> anyhow::Result<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.name() == name)
            .with_context(|| format!("cluster '{}' is not up", name))
    }

    /// Bring the whole scenario up and program its routing intent.
    pub async fn up(&mut self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.scenario.run_dir)?;

        for def in &self.scenario.clusters {
            let mut cluster = self.build_cluster(def);
            let coordinators = coordinator_hosts(&cluster);
            let workers = worker_hosts(&cluster, def);
            cluster
                .startup(coordinators, workers)
                .await
                .with_context(|| format!("starting cluster '{}'", def.name))?;
            self.clusters.push(cluster);
        }

        for c in &self.scenario.containers {
            let cluster = self.cluster(&c.cluster)?;
            cluster
                .resolve(&c.worker)?
                .create_container(&c.name)
                .await
                .with_context(|| {
                    format!("creating container '{}' on {}/{}", c.name, c.cluster, c.worker)
                })?;
        }

        for v in &self.scenario.vips {
            let cluster = self.cluster(&v.cluster)?;
            let backends: Vec<&str> = v.backends.iter().map(String::as_str).collect();
            cluster.apply_vip(v.vip, &backends).await?;
            info!(cluster = %v.cluster, vip = %v.vip, "VIP programmed");
        }

        if !self.scenario.services.is_empty() {
            self.write_router_configs()?;
        }

        Ok(())
    }

    /// One router artifact per cluster, linked to every other cluster.
    fn write_router_configs(&self) -> anyhow::Result<()> {
        let dir = self.scenario.run_dir.join("router");
        std::fs::create_dir_all(&dir)?;

        for cluster in &self.clusters {
            let builder = match &self.scenario.router_base {
                Some(template) => {
                    RouterConfigBuilder::with_base_template(cluster.name(), template)?
                }
                None => RouterConfigBuilder::new(cluster.name()),
            };
            let remotes = self
                .clusters
                .iter()
                .filter(|c| c.name() != cluster.name())
                .map(|c| c.mesh_site())
                .collect::<Result<Vec<_>, _>>()?;
            let path = dir.join(format!("{}.json", cluster.name()));
            builder.write_to(&path, &remotes, &self.scenario.services)?;
            info!(cluster = %cluster.name(), path = %path.display(), "router config written");
        }
        Ok(())
    }

    /// Best-effort teardown of every cluster, in reverse startup
    /// order, then removal of the run directory and everything it
    /// accumulated (work dirs, coordination data, router configs).
    pub async fn down(&mut self) {
        for cluster in self.clusters.iter_mut().rev() {
            cluster.terminate().await;
        }
        self.clusters.clear();

        if let Err(e) = std::fs::remove_dir_all(&self.scenario.run_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    dir = %self.scenario.run_dir.display(),
                    error = %e,
                    "run directory removal failed"
                );
            }
        }
    }

    /// Human-readable plan of the derived topology, without touching
    /// any host.
    pub fn plan(&self) -> String {
        let mut out = String::new();
        for def in &self.scenario.clusters {
            let cluster = self.build_cluster(def);
            let [e1, e2] = cluster.coordinator_names();
            let [a1, a2] = cluster.coordinator_addrs();
            let _ = writeln!(out, "cluster {} ({})", def.name, def.prefix);
            let _ = writeln!(out, "  coordinators: {} @ {}, {} @ {}", e1, a1, e2, a2);
            let _ = writeln!(out, "  workers: {}", cluster.planned_workers().join(", "));
        }
        for s in &self.scenario.services {
            let _ = writeln!(
                out,
                "service {} -> cluster {} ({}:{}, local port {})",
                s.name, s.cluster, s.host, s.port, s.lport
            );
        }
        out
    }
}
