//! Round-robin DNAT rule for virtual service IPs
//!
//! One rule maps a virtual IP to an ordered backend list via a
//! counter-based selector. The rendered text is a wire-format contract
//! with the packet-filter CLI: the `index: ip` map pairs live inside a
//! single brace pair, comma separated, in backend order.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::error::{MeshError, MeshResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VipRule {
    vip: Ipv4Addr,
    backends: Vec<Ipv4Addr>,
}

impl VipRule {
    /// Backend order is the order containers were resolved in; it is
    /// observable in the emitted rule and deliberately not normalized.
    pub fn new(vip: Ipv4Addr, backends: Vec<Ipv4Addr>) -> MeshResult<Self> {
        if backends.is_empty() {
            return Err(MeshError::ConfigError(format!(
                "VIP {} needs at least one backend",
                vip
            )));
        }
        Ok(Self { vip, backends })
    }

    pub fn vip(&self) -> Ipv4Addr {
        self.vip
    }

    pub fn backends(&self) -> &[Ipv4Addr] {
        &self.backends
    }

    /// Render the exact packet-filter command. Re-rendering with the
    /// same inputs is byte-identical.
    pub fn render(&self) -> String {
        let mut map = String::new();
        for (idx, ip) in self.backends.iter().enumerate() {
            if idx != 0 {
                map.push_str(", ");
            }
            let _ = write!(map, "{}: {}", idx, ip);
        }
        format!(
            "nft add rule ip nat PREROUTING ip daddr {} counter dnat to numgen inc mod {} map {{{}}}",
            self.vip,
            self.backends.len(),
            map
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_two_backend_map_in_order() {
        let rule = VipRule::new(
            Ipv4Addr::new(100, 64, 10, 1),
            vec![Ipv4Addr::new(10, 1, 0, 5), Ipv4Addr::new(10, 1, 0, 6)],
        )
        .unwrap();
        assert_eq!(
            rule.render(),
            "nft add rule ip nat PREROUTING ip daddr 100.64.10.1 \
             counter dnat to numgen inc mod 2 map {0: 10.1.0.5, 1: 10.1.0.6}"
        );
    }

    #[test]
    fn backend_order_is_preserved_not_sorted() {
        let forward = VipRule::new(
            Ipv4Addr::new(100, 64, 10, 1),
            vec![Ipv4Addr::new(10, 1, 0, 5), Ipv4Addr::new(10, 1, 0, 6)],
        )
        .unwrap();
        let reversed = VipRule::new(
            Ipv4Addr::new(100, 64, 10, 1),
            vec![Ipv4Addr::new(10, 1, 0, 6), Ipv4Addr::new(10, 1, 0, 5)],
        )
        .unwrap();
        assert!(forward.render().contains("{0: 10.1.0.5, 1: 10.1.0.6}"));
        assert!(reversed.render().contains("{0: 10.1.0.6, 1: 10.1.0.5}"));
        assert_ne!(forward.render(), reversed.render());
    }

    #[test]
    fn rendering_is_reproducible() {
        let rule = VipRule::new(
            Ipv4Addr::new(100, 64, 10, 1),
            vec![Ipv4Addr::new(11, 11, 0, 2)],
        )
        .unwrap();
        assert_eq!(rule.render(), rule.render());
    }

    #[test]
    fn empty_backend_list_is_rejected() {
        let err = VipRule::new(Ipv4Addr::new(100, 64, 10, 1), vec![]).unwrap_err();
        assert!(matches!(err, MeshError::ConfigError(_)));
    }
}
