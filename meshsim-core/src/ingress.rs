//! Ingress reverse-proxy configuration
//!
//! Emits the config file for the cluster-edge HTTP proxy: one server
//! block on a fixed listen port with one `location` per declared route,
//! in declaration order.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::MeshResult;

/// One path-to-backend route on the ingress proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub path: String,
    pub endpoint: String,
}

fn location(route: &RouteEntry) -> String {
    format!(
        "location {} {{ proxy_pass http://{}; }}",
        route.path, route.endpoint
    )
}

/// Render the full proxy config.
pub fn render_config(port: u16, routes: &[RouteEntry]) -> String {
    let mut out = String::from("events{}\n");
    out.push_str("http {\n");
    out.push_str("  server {\n");
    let _ = writeln!(out, "    listen {};", port);
    for route in routes {
        let _ = writeln!(out, "    {}", location(route));
    }
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}

pub fn write_config(path: &Path, port: u16, routes: &[RouteEntry]) -> MeshResult<()> {
    std::fs::write(path, render_config(port, routes))?;
    Ok(())
}

/// Command line that launches the proxy against a config file.
pub fn launch_command(config: &Path) -> String {
    format!("nginx -c {}", config.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_server_block_with_routes_in_order() {
        let routes = vec![
            RouteEntry {
                path: "/a".to_string(),
                endpoint: "11.11.0.2:8000".to_string(),
            },
            RouteEntry {
                path: "/b".to_string(),
                endpoint: "11.12.0.2:8000".to_string(),
            },
        ];
        let conf = render_config(8080, &routes);
        assert_eq!(
            conf,
            "events{}\n\
             http {\n  server {\n    listen 8080;\n    \
             location /a { proxy_pass http://11.11.0.2:8000; }\n    \
             location /b { proxy_pass http://11.12.0.2:8000; }\n  }\n}\n"
        );
    }

    #[test]
    fn empty_route_list_still_yields_valid_server_block() {
        let conf = render_config(80, &[]);
        assert!(conf.contains("listen 80;"));
        assert!(!conf.contains("location"));
    }

    #[test]
    fn launch_command_points_at_config() {
        assert_eq!(
            launch_command(Path::new("/tmp/meshsim/ingress.conf")),
            "nginx -c /tmp/meshsim/ingress.conf"
        );
    }
}
