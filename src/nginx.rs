//! Renders the dataplane IR into NGINX configuration and applies it.
//!
//! The event handler only sees the [`NginxConfigurer`] trait; the shipped
//! implementation writes the rendered file and TLS material to disk and
//! asks the NGINX master process to reload.

use nginx_gateway_controller_core::dataplane::{
    Backend, BackendGroup, Configuration, Generator, HttpFilters, PathRule, PathType,
    RequestRedirectFilter, SslKeyPair, VirtualServer, SYSTEM_ROOT_CA_PATH,
};
use nginx_gateway_controller_k8s_status::NginxReloadResult;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::debug;

/// The socket a group with no usable backend proxies to; a tiny server
/// behind it answers every request with a 502.
const INVALID_BACKEND_REF_SOCKET: &str = "unix:/var/run/nginx/nginx-502-server.sock";

/// Applies a configuration to the running NGINX instance.
#[async_trait::async_trait]
pub trait NginxConfigurer: Send + Sync {
    async fn apply(&self, configuration: &Configuration) -> NginxReloadResult;
}

/// Renders the IR into an `http`-context configuration file.
#[derive(Default)]
pub struct NginxGenerator;

impl Generator for NginxGenerator {
    fn generate(&self, configuration: &Configuration) -> Vec<u8> {
        let mut out = String::new();

        for upstream in &configuration.upstreams {
            let _ = writeln!(out, "upstream {} {{", upstream.name);
            let _ = writeln!(out, "    zone {} 512k;", upstream.name);
            if upstream.endpoints.is_empty() {
                let _ = writeln!(out, "    server {INVALID_BACKEND_REF_SOCKET};");
            } else {
                for endpoint in &upstream.endpoints {
                    let _ = writeln!(out, "    server {}:{};", endpoint.address, endpoint.port);
                }
            }
            let _ = writeln!(out, "}}");
        }

        for group in &configuration.backend_groups {
            write_split_clients(&mut out, group);
        }

        for server in configuration
            .http_servers
            .iter()
            .chain(&configuration.ssl_servers)
        {
            write_server(&mut out, server);
        }

        out.into_bytes()
    }
}

/// Weighted groups pick their upstream per request with a split_clients
/// map; single-backend groups proxy directly and need none.
fn write_split_clients(out: &mut String, group: &BackendGroup) {
    let backends: Vec<&Backend> = group.backends.iter().filter(|b| b.weight > 0).collect();
    if backends.len() < 2 {
        return;
    }

    let total: i64 = backends.iter().map(|b| i64::from(b.weight)).sum();
    if total == 0 {
        return;
    }

    let _ = writeln!(out, "split_clients $request_id ${} {{", group.name());
    for (idx, backend) in backends.iter().enumerate() {
        let share = f64::from(backend.weight) / total as f64 * 100.0;
        let target = backend_target(backend);
        if idx == backends.len() - 1 {
            // The remainder absorbs rounding drift.
            let _ = writeln!(out, "    * {target};");
        } else {
            let _ = writeln!(out, "    {share:.2}% {target};");
        }
    }
    let _ = writeln!(out, "}}");
}

fn backend_target(backend: &Backend) -> &str {
    if backend.valid && !backend.upstream_name.is_empty() {
        &backend.upstream_name
    } else {
        INVALID_BACKEND_REF_SOCKET
    }
}

fn write_server(out: &mut String, server: &VirtualServer) {
    let _ = writeln!(out, "server {{");

    let ssl = server.ssl.as_ref();
    if let Some(ssl) = ssl {
        let _ = writeln!(out, "    listen {} ssl;", server.port);
        let _ = writeln!(
            out,
            "    ssl_certificate /etc/nginx/secrets/{}.pem;",
            ssl.key_pair_id
        );
        let _ = writeln!(
            out,
            "    ssl_certificate_key /etc/nginx/secrets/{}.pem;",
            ssl.key_pair_id
        );
    } else if server.is_default {
        let _ = writeln!(out, "    listen {} default_server;", server.port);
    } else {
        let _ = writeln!(out, "    listen {};", server.port);
    }

    if server.is_default {
        let _ = writeln!(out, "    default_type text/html;");
        let _ = writeln!(out, "    return 404;");
        let _ = writeln!(out, "}}");
        return;
    }

    let _ = writeln!(out, "    server_name {};", server.hostname);

    for path_rule in &server.path_rules {
        write_location(out, path_rule);
    }

    let _ = writeln!(out, "}}");
}

fn write_location(out: &mut String, path_rule: &PathRule) {
    match path_rule.path_type {
        PathType::Exact => {
            let _ = writeln!(out, "    location = {} {{", path_rule.path);
        }
        PathType::Prefix => {
            let _ = writeln!(out, "    location {} {{", path_rule.path);
        }
    }

    // Match-rule dispatch beyond the first rule requires request inspection
    // that lives in the njs module; the first rule covers the common case
    // of one rule per path.
    if let Some(rule) = path_rule.match_rules.first() {
        write_filters(out, &rule.filters);
        if rule.filters.request_redirect.is_none() && !rule.filters.invalid {
            write_proxy_pass(out, &rule.backend_group);
        }
    } else {
        let _ = writeln!(out, "        return 404;");
    }

    let _ = writeln!(out, "    }}");
}

fn write_filters(out: &mut String, filters: &HttpFilters) {
    if filters.invalid {
        let _ = writeln!(out, "        return 500;");
        return;
    }

    if let Some(modifier) = &filters.request_header_modifier {
        for header in &modifier.remove {
            let _ = writeln!(out, "        proxy_set_header {header} \"\";");
        }
        for header in modifier.set.iter().chain(&modifier.add) {
            let _ = writeln!(
                out,
                "        proxy_set_header {} \"{}\";",
                header.name, header.value
            );
        }
    }

    if let Some(redirect) = &filters.request_redirect {
        write_redirect(out, redirect);
    }
}

fn write_redirect(out: &mut String, redirect: &RequestRedirectFilter) {
    let scheme = redirect.scheme.as_deref().unwrap_or("$scheme");
    let host = redirect.hostname.as_deref().unwrap_or("$host");
    let code = redirect.status_code.unwrap_or(302);
    match redirect.port {
        Some(port) => {
            let _ = writeln!(
                out,
                "        return {code} {scheme}://{host}:{port}$request_uri;"
            );
        }
        None => {
            let _ = writeln!(out, "        return {code} {scheme}://{host}$request_uri;");
        }
    }
}

fn write_proxy_pass(out: &mut String, group: &BackendGroup) {
    let valid: Vec<&Backend> = group
        .backends
        .iter()
        .filter(|b| b.valid && b.weight > 0)
        .collect();

    if let Some(verify) = valid.first().and_then(|b| b.verify_tls.as_ref()) {
        let bundle = verify
            .cert_bundle_id
            .as_ref()
            .map(|id| format!("/etc/nginx/secrets/{id}.crt"))
            .unwrap_or_else(|| SYSTEM_ROOT_CA_PATH.to_string());
        let _ = writeln!(out, "        proxy_ssl_trusted_certificate {bundle};");
        let _ = writeln!(out, "        proxy_ssl_name {};", verify.hostname);
        let _ = writeln!(out, "        proxy_ssl_verify on;");
        let _ = writeln!(out, "        proxy_ssl_server_name on;");
    }

    match valid.len() {
        0 => {
            let _ = writeln!(out, "        proxy_pass http://{INVALID_BACKEND_REF_SOCKET};");
        }
        1 => {
            let _ = writeln!(out, "        proxy_pass http://{};", valid[0].upstream_name);
        }
        _ => {
            let _ = writeln!(out, "        proxy_pass http://${};", group.name());
        }
    }
}

/// Writes the rendered configuration and TLS material, then reloads NGINX.
pub struct FileSystemConfigurer {
    generator: NginxGenerator,
    config_path: PathBuf,
    secrets_dir: PathBuf,
    /// Binary invoked as `<reload_command> -s reload`; `None` skips the
    /// reload (useful outside the NGINX container).
    reload_command: Option<String>,
}

impl FileSystemConfigurer {
    pub fn new(config_path: PathBuf, secrets_dir: PathBuf, reload_command: Option<String>) -> Self {
        Self {
            generator: NginxGenerator,
            config_path,
            secrets_dir,
            reload_command,
        }
    }

    async fn write_all(&self, configuration: &Configuration) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.secrets_dir).await?;

        for (id, SslKeyPair { cert, key }) in &configuration.ssl_key_pairs {
            let mut pem = cert.clone();
            pem.extend_from_slice(key);
            tokio::fs::write(self.secrets_dir.join(format!("{id}.pem")), pem).await?;
        }
        for (id, bundle) in &configuration.cert_bundles {
            tokio::fs::write(self.secrets_dir.join(format!("{id}.crt")), &bundle.cert).await?;
        }

        let rendered = self.generator.generate(configuration);
        tokio::fs::write(&self.config_path, rendered).await
    }
}

#[async_trait::async_trait]
impl NginxConfigurer for FileSystemConfigurer {
    async fn apply(&self, configuration: &Configuration) -> NginxReloadResult {
        if let Err(error) = self.write_all(configuration).await {
            return NginxReloadResult {
                error: Some(format!("failed to write configuration: {error}")),
            };
        }

        let Some(command) = &self.reload_command else {
            debug!(version = configuration.version, "configuration written; reload skipped");
            return NginxReloadResult::default();
        };

        let result = tokio::process::Command::new(command)
            .args(["-s", "reload"])
            .status()
            .await;

        match result {
            Ok(status) if status.success() => NginxReloadResult::default(),
            Ok(status) => NginxReloadResult {
                error: Some(format!("nginx reload exited with {status}")),
            },
            Err(error) => NginxReloadResult {
                error: Some(format!("failed to run nginx reload: {error}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginx_gateway_controller_core::dataplane::{MatchRule, RouteMatch, Ssl};
    use nginx_gateway_controller_core::ResourceId;

    fn group(backends: Vec<Backend>) -> BackendGroup {
        BackendGroup {
            source: ResourceId::new("test", "hr-1"),
            rule_idx: 0,
            backends,
        }
    }

    fn backend(upstream: &str, weight: i32) -> Backend {
        Backend {
            upstream_name: upstream.to_string(),
            weight,
            valid: true,
            verify_tls: None,
        }
    }

    fn server_with_group(group: BackendGroup) -> VirtualServer {
        VirtualServer {
            is_default: false,
            hostname: "foo.example.com".to_string(),
            ssl: None,
            port: 80,
            path_rules: vec![PathRule {
                path: "/".to_string(),
                path_type: PathType::Prefix,
                match_rules: vec![MatchRule {
                    source: ResourceId::new("test", "hr-1"),
                    match_: RouteMatch::default(),
                    filters: HttpFilters::default(),
                    backend_group: group,
                }],
            }],
        }
    }

    #[test]
    fn single_backend_groups_proxy_directly() {
        let configuration = Configuration {
            http_servers: vec![server_with_group(group(vec![backend("test_foo_80", 1)]))],
            ..Default::default()
        };

        let rendered = String::from_utf8(NginxGenerator.generate(&configuration)).unwrap();
        assert!(rendered.contains("proxy_pass http://test_foo_80;"));
        assert!(!rendered.contains("split_clients"));
    }

    #[test]
    fn weighted_groups_go_through_split_clients() {
        let g = group(vec![backend("test_foo_80", 80), backend("test_bar_80", 20)]);
        let configuration = Configuration {
            backend_groups: vec![g.clone()],
            http_servers: vec![server_with_group(g.clone())],
            ..Default::default()
        };

        let rendered = String::from_utf8(NginxGenerator.generate(&configuration)).unwrap();
        assert!(rendered.contains(&format!("split_clients $request_id ${}", g.name())));
        assert!(rendered.contains("80.00% test_foo_80;"));
        assert!(rendered.contains("* test_bar_80;"));
        assert!(rendered.contains(&format!("proxy_pass http://${};", g.name())));
    }

    #[test]
    fn empty_upstreams_point_at_the_error_socket() {
        let configuration = Configuration {
            upstreams: vec![nginx_gateway_controller_core::dataplane::Upstream {
                name: "test_foo_80".to_string(),
                endpoints: vec![],
                error_msg: Some("resolution failed".to_string()),
            }],
            ..Default::default()
        };

        let rendered = String::from_utf8(NginxGenerator.generate(&configuration)).unwrap();
        assert!(rendered.contains(&format!("server {INVALID_BACKEND_REF_SOCKET};")));
    }

    #[test]
    fn ssl_servers_reference_their_keypair() {
        let mut server = server_with_group(group(vec![backend("test_foo_80", 1)]));
        server.ssl = Some(Ssl {
            key_pair_id: "ssl_keypair_test_secret-1".to_string(),
        });
        server.port = 443;

        let configuration = Configuration {
            ssl_servers: vec![server],
            ..Default::default()
        };

        let rendered = String::from_utf8(NginxGenerator.generate(&configuration)).unwrap();
        assert!(rendered.contains("listen 443 ssl;"));
        assert!(
            rendered.contains("ssl_certificate /etc/nginx/secrets/ssl_keypair_test_secret-1.pem;")
        );
    }
}
