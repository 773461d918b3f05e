//! Worker host behavior
//!
//! A `Worker` composes a [`Host`] handle with the per-worker state this
//! crate owns: the container registry, the overlay bootstrap status and
//! the local working directory (attachment descriptor, subnet file,
//! agent log). Container namespaces are scoped `k<cluster>_<name>` so
//! clusters sharing one emulated fabric cannot collide.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::commands::{
    self, AttachOp, AttachmentTool, OverlayAgentLaunch,
};
use crate::error::{MeshError, MeshResult};
use crate::host::{CommandOutput, Host};
use crate::registry::ContainerRegistry;

/// Attachment descriptor consumed by the overlay attachment tool.
#[derive(Serialize)]
struct AttachmentDescriptor<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "subnetFile")]
    subnet_file: String,
    #[serde(rename = "dataDir")]
    data_dir: String,
    delegate: Delegate,
}

#[derive(Serialize)]
struct Delegate {
    #[serde(rename = "isDefaultGateway")]
    is_default_gateway: bool,
}

pub struct Worker {
    host: Arc<dyn Host>,
    cluster: String,
    coordinator: Ipv4Addr,
    work_dir: PathBuf,
    registry: RwLock<ContainerRegistry>,
    overlay_ready: AtomicBool,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("host", &self.host.name())
            .field("cluster", &self.cluster)
            .field("coordinator", &self.coordinator)
            .field("work_dir", &self.work_dir)
            .field("overlay_ready", &self.overlay_ready)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Declare a worker over an emulated host. The working directory
    /// for agent state and config files is created eagerly; the worker
    /// stays inert until the cluster sequences its overlay bootstrap.
    pub fn new(
        host: Arc<dyn Host>,
        cluster: impl Into<String>,
        coordinator: Ipv4Addr,
        run_dir: &Path,
    ) -> MeshResult<Self> {
        let work_dir = run_dir.join(host.name());
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self {
            host,
            cluster: cluster.into(),
            coordinator,
            work_dir,
            registry: RwLock::new(ContainerRegistry::new()),
            overlay_ready: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        self.host.name()
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.host.addr()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Derived namespace name for a container on this worker's cluster.
    fn namespace_for(&self, name: &str) -> String {
        format!("k{}_{}", self.cluster, name)
    }

    fn subnet_file(&self) -> PathBuf {
        self.work_dir.join("subnet.env")
    }

    pub async fn owns(&self, name: &str) -> bool {
        self.registry.read().await.contains(name)
    }

    pub async fn containers(&self) -> Vec<String> {
        self.registry.read().await.snapshot()
    }

    /// Start the overlay-network agent bound to this worker's address
    /// and the cluster's coordination endpoint. Detached; readiness is
    /// the cluster's propagation check.
    pub async fn bootstrap_overlay(&self) -> MeshResult<()> {
        let launch = OverlayAgentLaunch {
            iface_addr: self.host.addr(),
            coordinator: self.coordinator,
            subnet_file: self.subnet_file(),
            log_file: self.work_dir.join("overlay.log"),
        };
        info!(worker = %self.name(), "starting overlay agent");
        self.host.spawn(&launch.render()).await
    }

    /// Write the attachment descriptor the attachment tool reads at
    /// container-creation time. Completing this marks the worker ready
    /// for `create_container`.
    pub async fn write_attachment_descriptor(&self) -> MeshResult<()> {
        let descriptor = AttachmentDescriptor {
            name: self.name(),
            kind: "flannel",
            subnet_file: self.subnet_file().display().to_string(),
            data_dir: self.work_dir.join("overlay-data").display().to_string(),
            delegate: Delegate {
                is_default_gateway: true,
            },
        };
        let json = serde_json::to_string(&descriptor).map_err(|e| MeshError::Serialization {
            operation: "attachment descriptor".to_string(),
            source: e,
        })?;
        tokio::fs::write(self.work_dir.join("overlay_conf.json"), json).await?;

        self.overlay_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Probe whether the overlay configuration written during cluster
    /// startup is visible from this worker. Used by the cluster's
    /// bounded propagation wait.
    pub async fn overlay_config_visible(&self) -> MeshResult<bool> {
        let probe = commands::CoordinatorGetKey {
            endpoint: self.coordinator,
            key: commands::OVERLAY_CONFIG_KEY,
        };
        Ok(self.host.run(&probe.render()).await?.success)
    }

    /// Idempotently ensure the NAT table and PREROUTING chain used by
    /// VIP rules exist. "Already exists" failures from the tool are
    /// swallowed.
    pub async fn setup_load_balance_chain(&self) -> MeshResult<()> {
        let table = self.host.run(&commands::nat_table_add()).await?;
        if !table.success {
            debug!(worker = %self.name(), stderr = %table.stderr, "nat table add not clean");
        }
        let chain = self.host.run(&commands::nat_chain_add()).await?;
        if !chain.success {
            debug!(worker = %self.name(), stderr = %chain.stderr, "nat chain add not clean");
        }
        Ok(())
    }

    /// Create a container: remove any stale namespace of the derived
    /// name, create the namespace, attach it to the overlay, then
    /// register it. Attach failure rolls the namespace back and leaves
    /// the registry untouched.
    pub async fn create_container(&self, name: &str) -> MeshResult<()> {
        if !self.overlay_ready.load(Ordering::SeqCst) {
            return Err(MeshError::OverlayNotReady {
                worker: self.name().to_string(),
            });
        }
        if self.registry.read().await.contains(name) {
            return Err(MeshError::DuplicateContainer {
                name: name.to_string(),
            });
        }

        let netns = self.namespace_for(name);

        // Stale namespace from a previous crash; absence is the normal case.
        let _ = self.host.run(&commands::netns_del(&netns)).await;

        let created = self.host.run(&commands::netns_add(&netns)).await?;
        if !created.success {
            return Err(MeshError::CommandFailed {
                command: commands::netns_add(&netns),
                details: created.stderr,
            });
        }

        let attach = AttachmentTool {
            op: AttachOp::Add,
            netconf_dir: &self.work_dir,
            network: self.name(),
            netns: &netns,
        };
        let attached = self.host.run(&attach.render()).await?;
        if !attached.success {
            let _ = self.host.run(&commands::netns_del(&netns)).await;
            return Err(MeshError::AttachFailed {
                container: name.to_string(),
                details: attached.stderr,
            });
        }

        self.registry.write().await.add(name)?;
        info!(worker = %self.name(), container = name, "created container");
        Ok(())
    }

    /// Delete a container: detach from the overlay, remove the
    /// namespace, then unregister. Detach and namespace removal are
    /// best-effort; the registry entry always goes away.
    pub async fn delete_container(&self, name: &str) -> MeshResult<()> {
        if !self.registry.read().await.contains(name) {
            return Err(MeshError::ContainerNotFound {
                name: name.to_string(),
            });
        }

        let netns = self.namespace_for(name);

        let detach = AttachmentTool {
            op: AttachOp::Del,
            netconf_dir: &self.work_dir,
            network: self.name(),
            netns: &netns,
        };
        match self.host.run(&detach.render()).await {
            Ok(out) if !out.success => {
                warn!(worker = %self.name(), container = name, stderr = %out.stderr,
                      "overlay detach failed, continuing teardown");
            }
            Err(e) => {
                warn!(worker = %self.name(), container = name, error = %e,
                      "overlay detach errored, continuing teardown");
            }
            _ => {}
        }

        match self.host.run(&commands::netns_del(&netns)).await {
            Ok(out) if !out.success => {
                warn!(worker = %self.name(), container = name, stderr = %out.stderr,
                      "namespace removal failed, continuing teardown");
            }
            Err(e) => {
                warn!(worker = %self.name(), container = name, error = %e,
                      "namespace removal errored, continuing teardown");
            }
            _ => {}
        }

        self.registry.write().await.remove(name)?;
        info!(worker = %self.name(), container = name, "deleted container");
        Ok(())
    }

    /// Run a command inside a registered container and capture output.
    pub async fn exec_in_container(&self, name: &str, command: &str) -> MeshResult<CommandOutput> {
        if !self.registry.read().await.contains(name) {
            return Err(MeshError::ContainerNotFound {
                name: name.to_string(),
            });
        }
        let netns = self.namespace_for(name);
        self.host.run(&commands::netns_exec(&netns, command)).await
    }

    /// Fire-and-forget variant; output is discarded.
    pub async fn exec_in_container_detached(&self, name: &str, command: &str) -> MeshResult<()> {
        if !self.registry.read().await.contains(name) {
            return Err(MeshError::ContainerNotFound {
                name: name.to_string(),
            });
        }
        let netns = self.namespace_for(name);
        self.host
            .spawn(&commands::netns_exec(&netns, command))
            .await
    }

    /// Resolve the live overlay address of a registered container by
    /// asking it for its own address.
    pub async fn container_addr(&self, name: &str) -> MeshResult<Ipv4Addr> {
        let out = self.exec_in_container(name, "hostname -I").await?;
        let first = out.stdout.split_whitespace().next().unwrap_or("");
        first.parse().map_err(|_| MeshError::CommandFailed {
            command: format!("hostname -I in container '{}'", name),
            details: format!("unparseable address output: {:?}", out.stdout),
        })
    }

    /// Apply a pre-rendered packet-filter rule on this worker.
    pub async fn apply_nat_rule(&self, rule: &str) -> MeshResult<()> {
        let out = self.host.run(rule).await?;
        if !out.success {
            return Err(MeshError::CommandFailed {
                command: rule.to_string(),
                details: out.stderr,
            });
        }
        Ok(())
    }

    /// Tear down every registered container, then stop the overlay
    /// agent. Per-container failures are logged and never abort the
    /// sweep; afterwards the registry is empty.
    pub async fn terminate(&self) {
        let names = self.registry.read().await.snapshot();
        for name in names {
            if let Err(e) = self.delete_container(&name).await {
                warn!(worker = %self.name(), container = %name, error = %e,
                      "container teardown failed");
                // Registry must track intent even when cleanup fails.
                let _ = self.registry.write().await.remove(&name);
            }
        }

        let kill = format!("pkill -f 'flanneld -iface={}'", self.host.addr());
        let _ = self.host.run(&kill).await;
        self.overlay_ready.store(false, Ordering::SeqCst);
        info!(worker = %self.name(), "worker terminated");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Recording host with scripted failure modes.
    pub(crate) struct MockHost {
        name: String,
        addr: Ipv4Addr,
        pub commands: Mutex<Vec<String>>,
        pub fail_matching: Option<String>,
        pub container_addr: String,
    }

    impl MockHost {
        pub fn new(name: &str, addr: Ipv4Addr) -> Self {
            Self {
                name: name.to_string(),
                addr,
                commands: Mutex::new(Vec::new()),
                fail_matching: None,
                container_addr: "11.11.0.2".to_string(),
            }
        }

        pub fn failing(name: &str, addr: Ipv4Addr, pattern: &str) -> Self {
            Self {
                fail_matching: Some(pattern.to_string()),
                ..Self::new(name, addr)
            }
        }

        pub fn recorded(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Host for MockHost {
        fn name(&self) -> &str {
            &self.name
        }

        fn addr(&self) -> Ipv4Addr {
            self.addr
        }

        async fn run(&self, command: &str) -> MeshResult<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            if let Some(pattern) = &self.fail_matching {
                if command.contains(pattern.as_str()) {
                    return Ok(CommandOutput::failed("scripted failure"));
                }
            }
            if command.contains("hostname -I") {
                return Ok(CommandOutput::ok(format!("{} \n", self.container_addr)));
            }
            Ok(CommandOutput::ok(""))
        }

        async fn spawn(&self, command: &str) -> MeshResult<()> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    pub(crate) async fn ready_worker(host: Arc<dyn Host>, run_dir: &Path) -> Worker {
        let worker = Worker::new(host, "0", Ipv4Addr::new(10, 0, 0, 1), run_dir).unwrap();
        worker.write_attachment_descriptor().await.unwrap();
        worker
    }

    #[tokio::test]
    async fn create_before_overlay_ready_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = Worker::new(host, "0", Ipv4Addr::new(10, 0, 0, 1), dir.path()).unwrap();

        let err = worker.create_container("c1").await.unwrap_err();
        assert!(matches!(err, MeshError::OverlayNotReady { .. }));
    }

    #[tokio::test]
    async fn create_issues_stale_delete_then_add_then_attach() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = ready_worker(host.clone(), dir.path()).await;

        worker.create_container("c1").await.unwrap();

        let cmds = host.recorded();
        assert_eq!(cmds[0], "ip netns del k0_c1");
        assert_eq!(cmds[1], "ip netns add k0_c1");
        assert!(cmds[2].contains("cnitool add C0w1 /var/run/netns/k0_c1"));
        assert!(worker.owns("c1").await);
    }

    #[tokio::test]
    async fn create_is_idempotent_over_stale_namespaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = ready_worker(host.clone(), dir.path()).await;

        // Simulate crash recovery: namespace physically present but not
        // registered. The defensive delete makes the second create succeed.
        worker.create_container("c1").await.unwrap();
        worker.registry.write().await.remove("c1").unwrap();
        worker.create_container("c1").await.unwrap();
        assert!(worker.owns("c1").await);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected_before_any_namespace_work() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = ready_worker(host.clone(), dir.path()).await;

        worker.create_container("c1").await.unwrap();
        let issued_before = host.recorded().len();
        let err = worker.create_container("c1").await.unwrap_err();
        assert!(matches!(err, MeshError::DuplicateContainer { .. }));
        assert_eq!(host.recorded().len(), issued_before);
    }

    #[tokio::test]
    async fn attach_failure_rolls_back_namespace_and_skips_registration() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::failing(
            "C0w1",
            Ipv4Addr::new(10, 0, 0, 3),
            "cnitool add",
        ));
        let worker = ready_worker(host.clone(), dir.path()).await;

        let err = worker.create_container("c1").await.unwrap_err();
        assert!(matches!(err, MeshError::AttachFailed { .. }));
        assert!(!worker.owns("c1").await);

        let cmds = host.recorded();
        // Rollback delete after the failed attach.
        assert_eq!(cmds.last().unwrap(), "ip netns del k0_c1");
    }

    #[tokio::test]
    async fn delete_unregisters_even_when_cleanup_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::failing(
            "C0w1",
            Ipv4Addr::new(10, 0, 0, 3),
            "cnitool del",
        ));
        let worker = ready_worker(host.clone(), dir.path()).await;

        worker.create_container("c1").await.unwrap();
        worker.delete_container("c1").await.unwrap();
        assert!(!worker.owns("c1").await);
    }

    #[tokio::test]
    async fn exec_on_unknown_container_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = ready_worker(host.clone(), dir.path()).await;

        let err = worker.exec_in_container("ghost", "true").await.unwrap_err();
        assert!(matches!(err, MeshError::ContainerNotFound { .. }));
    }

    #[tokio::test]
    async fn container_addr_parses_first_token() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = ready_worker(host.clone(), dir.path()).await;

        worker.create_container("c1").await.unwrap();
        let addr = worker.container_addr("c1").await.unwrap();
        assert_eq!(addr, Ipv4Addr::new(11, 11, 0, 2));
    }

    #[tokio::test]
    async fn terminate_empties_registry_despite_failures() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::failing(
            "C0w1",
            Ipv4Addr::new(10, 0, 0, 3),
            "ip netns del",
        ));
        let worker = ready_worker(host.clone(), dir.path()).await;

        // Stale-delete failures are ignored by create.
        worker.create_container("c1").await.unwrap();
        worker.create_container("c2").await.unwrap();

        worker.terminate().await;
        assert!(worker.containers().await.is_empty());
    }

    #[tokio::test]
    async fn attachment_descriptor_matches_tool_contract() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = Arc::new(MockHost::new("C0w1", Ipv4Addr::new(10, 0, 0, 3)));
        let worker = ready_worker(host.clone(), dir.path()).await;

        let raw =
            std::fs::read_to_string(worker.work_dir().join("overlay_conf.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["name"], "C0w1");
        assert_eq!(parsed["type"], "flannel");
        assert_eq!(parsed["delegate"]["isDefaultGateway"], true);
        assert!(parsed["subnetFile"].as_str().unwrap().ends_with("subnet.env"));
    }
}
