//! Multi-cluster router configuration
//!
//! Builds the per-cluster router artifact: an ordered list of
//! `[sectionType, attributes]` pairs serialized as JSON. Section order
//! is fixed — identity, verbatim base block, one inter-cluster
//! connector per remote in input order, then one entry per declared
//! service in input order — so the artifact is byte-reproducible for
//! identical inputs.
//!
//! Exactly one cluster in the mesh emits a `tcpConnector` for a given
//! service (the service's home cluster); every other cluster emits a
//! `tcpListener` for it. The split is decided purely by comparing the
//! declared home-cluster identity to the builder's own site identity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{MeshError, MeshResult};

/// Link cost for inter-cluster connectors.
const INTER_ROUTER_COST: u32 = 1;
/// Inter-router listening port of the mesh router.
const INTER_ROUTER_PORT: &str = "55671";
/// Protocol-compatibility constants, not tunables.
const MAX_FRAME_SIZE: u32 = 16384;
const MAX_SESSION_FRAMES: u32 = 640;
const ROUTER_VERSION: &str = "1.0.2";

/// A service declared up front for the whole mesh. `cluster` names the
/// home cluster that actually hosts the backend; `lport` is the local
/// proxy port every other cluster listens on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub cluster: String,
    pub host: String,
    pub port: u16,
    pub lport: u16,
}

/// Another cluster's router as a link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSite {
    pub name: String,
    pub host: String,
}

pub struct RouterConfigBuilder {
    site: String,
    base: Vec<Value>,
}

impl RouterConfigBuilder {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            base: Vec::new(),
        }
    }

    /// Load the fixed base configuration block, a JSON array of
    /// sections appended verbatim after the identity entry.
    pub fn with_base_template(site: impl Into<String>, template: &Path) -> MeshResult<Self> {
        let raw = std::fs::read_to_string(template)?;
        let base: Vec<Value> =
            serde_json::from_str(&raw).map_err(|e| MeshError::Serialization {
                operation: format!("router base template '{}'", template.display()),
                source: e,
            })?;
        Ok(Self {
            site: site.into(),
            base,
        })
    }

    fn identity(&self) -> Value {
        let metadata = json!({ "id": self.site, "version": ROUTER_VERSION }).to_string();
        json!([
            "router",
            {
                "id": self.site,
                "mode": "interior",
                "helloMaxAgeSeconds": "3",
                "metadata": metadata,
            }
        ])
    }

    /// Assemble the full artifact in declaration order.
    pub fn build(&self, remotes: &[RemoteSite], services: &[ServiceSpec]) -> Vec<Value> {
        let mut conf = Vec::with_capacity(2 + remotes.len() + services.len());
        conf.push(self.identity());
        conf.extend(self.base.iter().cloned());

        for remote in remotes {
            conf.push(json!([
                "connector",
                {
                    "name": remote.name,
                    "role": "inter-router",
                    "host": remote.host,
                    "port": INTER_ROUTER_PORT,
                    "cost": INTER_ROUTER_COST,
                    "maxFrameSize": MAX_FRAME_SIZE,
                    "maxSessionFrames": MAX_SESSION_FRAMES,
                }
            ]));
        }

        for svc in services {
            let entry = if svc.cluster == self.site {
                // The service runs here: expose the backend.
                json!([
                    "tcpConnector",
                    {
                        "name": svc.name,
                        "address": svc.name,
                        "siteId": self.site,
                        "host": svc.host,
                        "port": svc.port,
                    }
                ])
            } else {
                // Remote service: proxy it on the local port.
                json!([
                    "tcpListener",
                    {
                        "name": svc.name,
                        "address": svc.name,
                        "siteId": self.site,
                        "port": svc.lport,
                    }
                ])
            };
            conf.push(entry);
        }

        conf
    }

    /// Serialized artifact for distribution to the router process.
    pub fn render(&self, remotes: &[RemoteSite], services: &[ServiceSpec]) -> MeshResult<String> {
        serde_json::to_string_pretty(&self.build(remotes, services)).map_err(|e| {
            MeshError::Serialization {
                operation: format!("router config for site '{}'", self.site),
                source: e,
            }
        })
    }

    pub fn write_to(
        &self,
        path: &Path,
        remotes: &[RemoteSite],
        services: &[ServiceSpec],
    ) -> MeshResult<()> {
        std::fs::write(path, self.render(remotes, services)?)?;
        Ok(())
    }
}
