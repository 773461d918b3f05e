//! Declarative scenario files
//!
//! A scenario is the full topology intent in one TOML document:
//! clusters, container placement, VIPs and the mesh-wide service list.
//! Everything is declared up front; the orchestrator replays it in
//! order.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ipnet::Ipv4Net;
use meshsim_core::ServiceSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Root for per-node working directories and generated artifacts.
    pub run_dir: PathBuf,
    /// Overlay network configuration loaded into each cluster's
    /// coordination service.
    pub overlay_config: PathBuf,
    /// Optional base block for the mesh-router configs.
    pub router_base: Option<PathBuf>,
    pub clusters: Vec<ClusterDef>,
    #[serde(default)]
    pub containers: Vec<ContainerDef>,
    #[serde(default)]
    pub vips: Vec<VipDef>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterDef {
    pub name: String,
    pub workers: usize,
    /// Address range of the cluster's underlay; the coordination pair
    /// takes the first two host addresses and workers follow.
    pub prefix: Ipv4Net,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerDef {
    pub cluster: String,
    /// Short worker name, e.g. `w1`.
    pub worker: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VipDef {
    pub cluster: String,
    pub vip: Ipv4Addr,
    pub backends: Vec<String>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario file {}", path.display()))?;
        let scenario: Scenario = toml::from_str(&raw)
            .with_context(|| format!("parsing scenario file {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.clusters.is_empty() {
            anyhow::bail!("scenario declares no clusters");
        }
        for c in &self.containers {
            if !self.clusters.iter().any(|cl| cl.name == c.cluster) {
                anyhow::bail!(
                    "container '{}' placed on unknown cluster '{}'",
                    c.name,
                    c.cluster
                );
            }
        }
        for v in &self.vips {
            if !self.clusters.iter().any(|cl| cl.name == v.cluster) {
                anyhow::bail!("VIP {} targets unknown cluster '{}'", v.vip, v.cluster);
            }
        }
        for s in &self.services {
            if !self.clusters.iter().any(|cl| cl.name == s.cluster) {
                anyhow::bail!(
                    "service '{}' declares unknown home cluster '{}'",
                    s.name,
                    s.cluster
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
run_dir = "/tmp/meshsim"
overlay_config = "conf/overlay-network.json"
router_base = "conf/router_base.json"

[[clusters]]
name = "0"
workers = 3
prefix = "10.0.0.0/16"

[[clusters]]
name = "1"
workers = 2
prefix = "10.1.0.0/16"

[[containers]]
cluster = "0"
worker = "w1"
name = "c1"

[[vips]]
cluster = "0"
vip = "100.64.10.1"
backends = ["c1"]

[[services]]
name = "svc1"
cluster = "0"
host = "11.11.0.2"
port = 80
lport = 1028
"#;

    #[test]
    fn parses_full_scenario() {
        let s: Scenario = toml::from_str(SAMPLE).unwrap();
        s.validate().unwrap();
        assert_eq!(s.clusters.len(), 2);
        assert_eq!(s.clusters[1].workers, 2);
        assert_eq!(s.vips[0].vip, Ipv4Addr::new(100, 64, 10, 1));
        assert_eq!(s.services[0].lport, 1028);
    }

    #[test]
    fn rejects_placement_on_unknown_cluster() {
        let mut s: Scenario = toml::from_str(SAMPLE).unwrap();
        s.containers.push(ContainerDef {
            cluster: "9".to_string(),
            worker: "w1".to_string(),
            name: "cx".to_string(),
        });
        assert!(s.validate().is_err());
    }
}
