//! Typed command builders for external tools
//!
//! Every external tool the orchestrator drives (coordination service,
//! overlay agent, attachment tool, namespace management, packet-filter
//! CLI) gets a builder that renders the exact on-wire argument text
//! from typed fields. Addresses are `Ipv4Addr` and paths are `Path`, so
//! malformed input cannot reach the shell.

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Peer-traffic port of the coordination service
pub const COORD_PEER_PORT: u16 = 2380;
/// Client-traffic port of the coordination service
pub const COORD_CLIENT_PORT: u16 = 2379;
/// Key under which the overlay network config is distributed
pub const OVERLAY_CONFIG_KEY: &str = "/coreos.com/network/config";

/// Default search path for attachment-tool plugins
const CNI_PLUGIN_PATH: &str = "/opt/cni/bin";

/// Render the `--initial-cluster` member list: `name=http://ip:2380`
/// pairs joined by commas, in member order.
pub fn initial_cluster(members: &[(String, Ipv4Addr)]) -> String {
    let mut out = String::new();
    for (i, (name, addr)) in members.iter().enumerate() {
        if i != 0 {
            out.push(',');
        }
        let _ = write!(out, "{}=http://{}:{}", name, addr, COORD_PEER_PORT);
    }
    out
}

/// Launch command for one coordination-service replica.
pub struct CoordinatorLaunch {
    pub name: String,
    pub addr: Ipv4Addr,
    pub initial_cluster: String,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl CoordinatorLaunch {
    pub fn render(&self) -> String {
        format!(
            "etcd --name {name} --data-dir {data} \
             --initial-advertise-peer-urls http://{ip}:{peer} \
             --listen-peer-urls http://{ip}:{peer} \
             --listen-client-urls http://{ip}:{client},http://127.0.0.1:{client} \
             --advertise-client-urls http://{ip}:{client} \
             --initial-cluster-token etcd-cluster \
             --initial-cluster {cluster} \
             --initial-cluster-state new > {log} 2>&1",
            name = self.name,
            data = self.data_dir.display(),
            ip = self.addr,
            peer = COORD_PEER_PORT,
            client = COORD_CLIENT_PORT,
            cluster = self.initial_cluster,
            log = self.log_file.display(),
        )
    }
}

/// Load a key into the coordination service from a local file.
pub struct CoordinatorLoadKey<'a> {
    pub key: &'a str,
    pub file: &'a Path,
}

impl CoordinatorLoadKey<'_> {
    pub fn render(&self) -> String {
        format!("etcdctl set {} < {}", self.key, self.file.display())
    }
}

/// Read a key back from the coordination service; used as the
/// visibility probe during startup.
pub struct CoordinatorGetKey<'a> {
    pub endpoint: Ipv4Addr,
    pub key: &'a str,
}

impl CoordinatorGetKey<'_> {
    pub fn render(&self) -> String {
        format!(
            "etcdctl --endpoints http://{}:{} get {}",
            self.endpoint, COORD_CLIENT_PORT, self.key
        )
    }
}

/// Liveness probe for a coordination-service endpoint.
pub struct CoordinatorHealth {
    pub endpoint: Ipv4Addr,
}

impl CoordinatorHealth {
    pub fn render(&self) -> String {
        format!(
            "etcdctl --endpoints http://{}:{} cluster-health",
            self.endpoint, COORD_CLIENT_PORT
        )
    }
}

/// Launch command for the overlay-network agent on one worker.
pub struct OverlayAgentLaunch {
    pub iface_addr: Ipv4Addr,
    pub coordinator: Ipv4Addr,
    pub subnet_file: PathBuf,
    pub log_file: PathBuf,
}

impl OverlayAgentLaunch {
    pub fn render(&self) -> String {
        format!(
            "flanneld -iface={} -etcd-endpoints http://{}:{} -subnet-file {} > {} 2>&1",
            self.iface_addr,
            self.coordinator,
            COORD_CLIENT_PORT,
            self.subnet_file.display(),
            self.log_file.display(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOp {
    Add,
    Del,
}

impl AttachOp {
    fn verb(self) -> &'static str {
        match self {
            AttachOp::Add => "add",
            AttachOp::Del => "del",
        }
    }
}

/// Attachment-tool invocation: `add`/`del` a namespace on the overlay
/// network described by the config directory.
pub struct AttachmentTool<'a> {
    pub op: AttachOp,
    pub netconf_dir: &'a Path,
    pub network: &'a str,
    pub netns: &'a str,
}

impl AttachmentTool<'_> {
    pub fn render(&self) -> String {
        format!(
            "CNI_PATH={} NETCONFPATH={} cnitool {} {} /var/run/netns/{}",
            CNI_PLUGIN_PATH,
            self.netconf_dir.display(),
            self.op.verb(),
            self.network,
            self.netns,
        )
    }
}

/// `ip netns add <ns>`
pub fn netns_add(netns: &str) -> String {
    format!("ip netns add {}", netns)
}

/// `ip netns del <ns>`
pub fn netns_del(netns: &str) -> String {
    format!("ip netns del {}", netns)
}

/// Run a command inside a namespace.
pub fn netns_exec(netns: &str, command: &str) -> String {
    format!("ip netns exec {} {}", netns, command)
}

/// Ensure the NAT table exists.
pub fn nat_table_add() -> String {
    "nft add table ip nat".to_string()
}

/// Ensure the PREROUTING chain used by VIP rules exists. Braces and the
/// statement terminator are escaped for the shell.
pub fn nat_chain_add() -> String {
    "nft add chain ip nat PREROUTING \\{ type nat hook prerouting priority dstnat \\; \\}"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn initial_cluster_joins_members_in_order() {
        let members = vec![
            ("C0e1".to_string(), Ipv4Addr::new(10, 0, 0, 1)),
            ("C0e2".to_string(), Ipv4Addr::new(10, 0, 0, 2)),
        ];
        assert_eq!(
            initial_cluster(&members),
            "C0e1=http://10.0.0.1:2380,C0e2=http://10.0.0.2:2380"
        );
    }

    #[test]
    fn coordinator_launch_carries_full_url_set() {
        let cmd = CoordinatorLaunch {
            name: "C0e1".to_string(),
            addr: Ipv4Addr::new(10, 0, 0, 1),
            initial_cluster: "C0e1=http://10.0.0.1:2380,C0e2=http://10.0.0.2:2380".to_string(),
            data_dir: PathBuf::from("/tmp/meshsim/C0e1.etcd"),
            log_file: PathBuf::from("/tmp/meshsim/C0e1.log"),
        }
        .render();

        assert!(cmd.starts_with("etcd --name C0e1 --data-dir /tmp/meshsim/C0e1.etcd"));
        assert!(cmd.contains("--initial-advertise-peer-urls http://10.0.0.1:2380"));
        assert!(cmd.contains("--listen-client-urls http://10.0.0.1:2379,http://127.0.0.1:2379"));
        assert!(cmd.contains(
            "--initial-cluster C0e1=http://10.0.0.1:2380,C0e2=http://10.0.0.2:2380"
        ));
        assert!(cmd.contains("--initial-cluster-state new"));
    }

    #[test]
    fn attachment_tool_renders_env_and_netns_path() {
        let cmd = AttachmentTool {
            op: AttachOp::Add,
            netconf_dir: Path::new("/tmp/meshsim/C0w1"),
            network: "C0w1",
            netns: "k0_c1",
        }
        .render();
        assert_eq!(
            cmd,
            "CNI_PATH=/opt/cni/bin NETCONFPATH=/tmp/meshsim/C0w1 cnitool add C0w1 /var/run/netns/k0_c1"
        );
    }

    #[test]
    fn overlay_agent_launch_points_at_coordinator() {
        let cmd = OverlayAgentLaunch {
            iface_addr: Ipv4Addr::new(10, 0, 0, 3),
            coordinator: Ipv4Addr::new(10, 0, 0, 1),
            subnet_file: PathBuf::from("/tmp/meshsim/C0w1/subnet.env"),
            log_file: PathBuf::from("/tmp/meshsim/C0w1/overlay.log"),
        }
        .render();
        assert_eq!(
            cmd,
            "flanneld -iface=10.0.0.3 -etcd-endpoints http://10.0.0.1:2379 \
             -subnet-file /tmp/meshsim/C0w1/subnet.env > /tmp/meshsim/C0w1/overlay.log 2>&1"
        );
    }

    #[test]
    fn load_key_reads_from_file() {
        let cmd = CoordinatorLoadKey {
            key: OVERLAY_CONFIG_KEY,
            file: Path::new("/tmp/meshsim/conf/overlay-network.json"),
        }
        .render();
        assert_eq!(
            cmd,
            "etcdctl set /coreos.com/network/config < /tmp/meshsim/conf/overlay-network.json"
        );
    }
}
