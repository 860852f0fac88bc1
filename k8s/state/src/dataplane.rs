//! Lowers the graph into the dataplane [`Configuration`].
//!
//! The lowering is fully deterministic: servers sort by port and hostname,
//! path rules by path, and match rules by the owning route's age. The only
//! async boundary is endpoint resolution; a resolution failure is recorded
//! on the upstream instead of failing the build.

use crate::graph::{
    hostnames::{cmp_hostname_specificity, hostnames_intersect},
    BackendRef, Graph, Listener, Route,
};
use chrono::{DateTime, Utc};
use nginx_gateway_controller_core::{
    dataplane::{
        cert_bundle_id, ssl_key_pair_id, upstream_name, Backend, BackendGroup, CertBundle,
        Configuration, HeaderMatch, HeaderModifierFilter, HttpFilters, HttpHeader, MatchRule,
        PathModifier, PathRule, PathType, QueryParamMatch, RequestRedirectFilter, RouteMatch, Ssl,
        SslKeyPair, Upstream, UrlRewriteFilter, VerifyTls, VirtualServer, WILDCARD_HOSTNAME,
    },
    ResourceId, ServiceResolver,
};
use nginx_gateway_controller_k8s_api::{
    gateway::{self as gw, filter_type, path_match_type, path_modifier_type, protocol},
    TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use std::collections::{BTreeMap, BTreeSet};

/// Builds the dataplane configuration for a graph. An absent or invalid
/// GatewayClass, or an absent Gateway, produces the empty configuration.
pub async fn build_configuration(
    graph: &Graph,
    resolver: &dyn ServiceResolver,
    version: u64,
) -> Configuration {
    if !graph_is_programmable(graph) {
        return Configuration {
            version,
            ..Default::default()
        };
    }

    let mut builder = ConfigBuilder::new(graph);

    let http_servers = builder.build_servers(protocol::HTTP);
    let ssl_servers = builder.build_servers(protocol::HTTPS);
    let upstreams = build_upstreams(graph, resolver).await;
    let ssl_key_pairs = builder.build_ssl_key_pairs();

    let ConfigBuilder {
        backend_groups,
        cert_bundles,
        ..
    } = builder;

    Configuration {
        http_servers,
        ssl_servers,
        upstreams,
        backend_groups: backend_groups.into_values().collect(),
        ssl_key_pairs,
        cert_bundles,
        version,
    }
}

/// Re-resolves the upstreams of a graph. Used on endpoints-only changes,
/// where servers and backend groups are untouched.
pub async fn build_upstreams(graph: &Graph, resolver: &dyn ServiceResolver) -> Vec<Upstream> {
    if !graph_is_programmable(graph) {
        return Vec::new();
    }

    let mut ports: BTreeSet<(ResourceId, i32)> = BTreeSet::new();
    for listener in valid_listeners(graph, None) {
        for route_id in &listener.routes {
            let Some(route) = graph.routes.get(route_id) else {
                continue;
            };
            for rule in &route.rules {
                for backend_ref in &rule.backend_refs {
                    if !backend_ref.valid {
                        continue;
                    }
                    if let Some(svc_id) = &backend_ref.svc_id {
                        ports.insert((svc_id.clone(), backend_ref.service_port.port));
                    }
                }
            }
        }
    }

    let mut upstreams = Vec::with_capacity(ports.len());
    for (svc_id, port) in ports {
        let name = upstream_name(&svc_id, port);
        match resolver.resolve(&svc_id, port).await {
            Ok(endpoints) => upstreams.push(Upstream {
                name,
                endpoints,
                error_msg: None,
            }),
            Err(error) => upstreams.push(Upstream {
                name,
                endpoints: Vec::new(),
                error_msg: Some(error.to_string()),
            }),
        }
    }

    upstreams
}

fn graph_is_programmable(graph: &Graph) -> bool {
    graph
        .gateway_class
        .as_ref()
        .is_some_and(|gc| gc.valid)
        && graph.gateway.is_some()
}

fn valid_listeners<'a>(
    graph: &'a Graph,
    protocol: Option<&'a str>,
) -> impl Iterator<Item = &'a Listener> {
    graph
        .gateway
        .iter()
        .flat_map(|gateway| gateway.listeners.iter())
        .filter(move |l| {
            l.valid && protocol.map_or(true, |p| l.source.protocol == p)
        })
}

/// Sorts match rules by route age, then route name, then rule index, then
/// the listener that bound the route.
type MatchRuleSortKey = (Option<DateTime<Utc>>, ResourceId, usize, usize);

struct ConfigBuilder<'a> {
    graph: &'a Graph,
    backend_groups: BTreeMap<(ResourceId, usize), BackendGroup>,
    cert_bundles: BTreeMap<String, CertBundle>,
}

#[derive(Default)]
struct ServerAccumulator {
    path_rules: BTreeMap<(String, PathType), Vec<(MatchRuleSortKey, MatchRule)>>,
}

impl<'a> ConfigBuilder<'a> {
    fn new(graph: &'a Graph) -> Self {
        Self {
            graph,
            backend_groups: BTreeMap::new(),
            cert_bundles: BTreeMap::new(),
        }
    }

    fn build_servers(&mut self, proto: &str) -> Vec<VirtualServer> {
        let ssl = proto == protocol::HTTPS;
        let listeners: Vec<&Listener> = valid_listeners(self.graph, Some(proto)).collect();

        // Accumulate rules per (port, hostname).
        let mut servers: BTreeMap<i32, BTreeMap<String, ServerAccumulator>> = BTreeMap::new();

        for (listener_idx, listener) in listeners.iter().enumerate() {
            let port_servers = servers.entry(listener.source.port).or_default();

            if ssl {
                // Every HTTPS listener owns a server for its hostname; a
                // listener without one owns the catch-all.
                let own = match listener.source.hostname.as_deref() {
                    None | Some("") => WILDCARD_HOSTNAME.to_string(),
                    Some(hostname) => hostname.to_string(),
                };
                port_servers.entry(own).or_default();
            }

            for route_id in &listener.routes {
                let Some(route) = self.graph.routes.get(route_id) else {
                    continue;
                };
                for hostname in accepted_hostnames(route, &listener.name) {
                    let server = port_servers.entry(hostname).or_default();
                    self.add_route_rules(server, route_id, route, listener_idx);
                }
            }
        }

        let mut result = Vec::new();
        for (port, port_servers) in servers {
            result.push(VirtualServer {
                is_default: true,
                port,
                ..Default::default()
            });

            for (hostname, accumulator) in port_servers {
                let ssl_config = ssl
                    .then(|| self.choose_ssl(&listeners, &hostname))
                    .flatten();

                let path_rules = accumulator
                    .path_rules
                    .into_iter()
                    .map(|((path, path_type), mut rules)| {
                        rules.sort_by(|(a, _), (b, _)| a.cmp(b));
                        PathRule {
                            path,
                            path_type,
                            match_rules: rules.into_iter().map(|(_, rule)| rule).collect(),
                        }
                    })
                    .collect();

                result.push(VirtualServer {
                    is_default: false,
                    hostname,
                    ssl: ssl_config,
                    port,
                    path_rules,
                });
            }
        }

        result
    }

    /// The keypair for a server hostname comes from the most specific
    /// listener on the port whose hostname matches it; the catch-all server
    /// matches only a hostname-less listener.
    fn choose_ssl(&self, listeners: &[&Listener], hostname: &str) -> Option<Ssl> {
        listeners
            .iter()
            .filter(|l| {
                let listener_hostname = l.source.hostname.as_deref().unwrap_or("");
                if hostname == WILDCARD_HOSTNAME {
                    listener_hostname.is_empty()
                } else {
                    hostnames_intersect(listener_hostname, hostname)
                }
            })
            .max_by(|a, b| {
                cmp_hostname_specificity(
                    a.source.hostname.as_deref().unwrap_or(""),
                    b.source.hostname.as_deref().unwrap_or(""),
                )
            })
            .and_then(|l| l.resolved_secret.as_ref())
            .map(|secret| Ssl {
                key_pair_id: ssl_key_pair_id(secret),
            })
    }

    fn add_route_rules(
        &mut self,
        server: &mut ServerAccumulator,
        route_id: &ResourceId,
        route: &Route,
        listener_idx: usize,
    ) {
        let source_rules = route.source.spec.rules.clone().unwrap_or_default();
        let created = route.source.metadata.creation_timestamp.as_ref().map(|t| t.0);

        for (rule_idx, rule) in route.rules.iter().enumerate() {
            if !rule.valid_matches {
                continue;
            }
            let Some(source_rule) = source_rules.get(rule_idx) else {
                continue;
            };

            let filters = if rule.valid_filters {
                build_filters(source_rule.filters.as_deref().unwrap_or_default())
            } else {
                HttpFilters {
                    invalid: true,
                    ..Default::default()
                }
            };

            let backend_group = self.build_backend_group(route_id, rule_idx, &rule.backend_refs);

            let matches = match &source_rule.matches {
                Some(matches) if !matches.is_empty() => matches.clone(),
                // A rule without matches matches every request.
                _ => vec![gw::HTTPRouteMatch::default()],
            };

            for match_ in &matches {
                let (path, path_type) = match &match_.path {
                    Some(path_match) => (
                        path_match.value.clone().unwrap_or_else(|| "/".to_string()),
                        match path_match.type_.as_deref() {
                            Some(path_match_type::EXACT) => PathType::Exact,
                            _ => PathType::Prefix,
                        },
                    ),
                    None => ("/".to_string(), PathType::Prefix),
                };

                let sort_key: MatchRuleSortKey =
                    (created, route_id.clone(), rule_idx, listener_idx);

                server
                    .path_rules
                    .entry((path, path_type))
                    .or_default()
                    .push((
                        sort_key,
                        MatchRule {
                            source: route_id.clone(),
                            match_: build_match(match_),
                            filters: filters.clone(),
                            backend_group: backend_group.clone(),
                        },
                    ));
            }
        }
    }

    fn build_backend_group(
        &mut self,
        route_id: &ResourceId,
        rule_idx: usize,
        backend_refs: &[BackendRef],
    ) -> BackendGroup {
        if let Some(group) = self.backend_groups.get(&(route_id.clone(), rule_idx)) {
            return group.clone();
        }

        let backends = backend_refs
            .iter()
            .map(|backend_ref| self.build_backend(backend_ref))
            .collect();

        let group = BackendGroup {
            source: route_id.clone(),
            rule_idx,
            backends,
        };
        self.backend_groups
            .insert((route_id.clone(), rule_idx), group.clone());
        group
    }

    fn build_backend(&mut self, backend_ref: &BackendRef) -> Backend {
        let upstream = if backend_ref.valid {
            backend_ref
                .svc_id
                .as_ref()
                .map(|svc| upstream_name(svc, backend_ref.service_port.port))
                .unwrap_or_default()
        } else {
            String::new()
        };

        Backend {
            upstream_name: upstream,
            weight: backend_ref.weight,
            valid: backend_ref.valid,
            verify_tls: self.build_verify_tls(backend_ref),
        }
    }

    fn build_verify_tls(&mut self, backend_ref: &BackendRef) -> Option<VerifyTls> {
        let policy = backend_ref
            .backend_tls_policy
            .as_ref()
            .and_then(|id| self.graph.backend_tls_policies.get(id))?;
        if !policy.valid {
            return None;
        }

        let cert_bundle = policy.ca_cert_ref.as_ref().and_then(|config_map| {
            let bundle_id = cert_bundle_id(config_map);
            let ca_cert = self
                .graph
                .referenced_ca_cert_config_maps
                .get(config_map)
                .and_then(|cm| cm.ca_cert.clone())?;
            self.cert_bundles
                .insert(bundle_id.clone(), CertBundle { cert: ca_cert });
            Some(bundle_id)
        });

        Some(VerifyTls {
            cert_bundle_id: cert_bundle,
            hostname: policy.source.spec.tls.hostname.clone(),
        })
    }

    fn build_ssl_key_pairs(&self) -> BTreeMap<String, SslKeyPair> {
        let mut pairs = BTreeMap::new();

        for listener in valid_listeners(self.graph, Some(protocol::HTTPS)) {
            let Some(secret_id) = &listener.resolved_secret else {
                continue;
            };
            let Some(secret) = self
                .graph
                .referenced_secrets
                .get(secret_id)
                .and_then(|s| s.source.as_ref())
            else {
                continue;
            };
            let Some(data) = &secret.data else {
                continue;
            };
            let (Some(cert), Some(key)) = (data.get(TLS_CERT_KEY), data.get(TLS_PRIVATE_KEY_KEY))
            else {
                continue;
            };

            pairs.insert(
                ssl_key_pair_id(secret_id),
                SslKeyPair {
                    cert: cert.0.clone(),
                    key: key.0.clone(),
                },
            );
        }

        pairs
    }
}

/// Hostnames the route bound on the named listener, across its parentRefs.
fn accepted_hostnames(route: &Route, listener_name: &str) -> Vec<String> {
    let mut hostnames: Vec<String> = route
        .parent_refs
        .iter()
        .filter_map(|parent_ref| parent_ref.attachment.as_ref())
        .flat_map(|attachment| {
            attachment
                .accepted_hostnames
                .get(listener_name)
                .cloned()
                .unwrap_or_default()
        })
        .collect();
    hostnames.sort();
    hostnames.dedup();
    hostnames
}

fn build_match(match_: &gw::HTTPRouteMatch) -> RouteMatch {
    RouteMatch {
        method: match_.method.clone(),
        headers: match_
            .headers
            .iter()
            .flatten()
            .map(|h| HeaderMatch {
                name: h.name.clone(),
                value: h.value.clone(),
            })
            .collect(),
        query_params: match_
            .query_params
            .iter()
            .flatten()
            .map(|q| QueryParamMatch {
                name: q.name.clone(),
                value: q.value.clone(),
            })
            .collect(),
    }
}

/// Coalesces a rule's filters: the first redirect and the first rewrite
/// win, and header modifiers merge in order with first-wins per header.
fn build_filters(filters: &[gw::HTTPRouteFilter]) -> HttpFilters {
    let mut result = HttpFilters::default();
    let mut seen_set: BTreeSet<String> = BTreeSet::new();
    let mut seen_add: BTreeSet<String> = BTreeSet::new();
    let mut seen_remove: BTreeSet<String> = BTreeSet::new();

    for filter in filters {
        match filter.type_.as_str() {
            filter_type::REQUEST_REDIRECT => {
                if result.request_redirect.is_none() {
                    if let Some(redirect) = &filter.request_redirect {
                        result.request_redirect = Some(RequestRedirectFilter {
                            scheme: redirect.scheme.clone(),
                            hostname: redirect.hostname.clone(),
                            port: redirect.port,
                            status_code: redirect.status_code,
                        });
                    }
                }
            }
            filter_type::URL_REWRITE => {
                if result.url_rewrite.is_none() {
                    if let Some(rewrite) = &filter.url_rewrite {
                        result.url_rewrite = Some(UrlRewriteFilter {
                            hostname: rewrite.hostname.clone(),
                            path: rewrite.path.as_ref().and_then(build_path_modifier),
                        });
                    }
                }
            }
            filter_type::REQUEST_HEADER_MODIFIER => {
                if let Some(modifier) = &filter.request_header_modifier {
                    let merged = result.request_header_modifier.get_or_insert_with(
                        HeaderModifierFilter::default,
                    );
                    for header in modifier.set.iter().flatten() {
                        if seen_set.insert(header.name.to_ascii_lowercase()) {
                            merged.set.push(HttpHeader {
                                name: header.name.clone(),
                                value: header.value.clone(),
                            });
                        }
                    }
                    for header in modifier.add.iter().flatten() {
                        if seen_add.insert(header.name.to_ascii_lowercase()) {
                            merged.add.push(HttpHeader {
                                name: header.name.clone(),
                                value: header.value.clone(),
                            });
                        }
                    }
                    for name in modifier.remove.iter().flatten() {
                        if seen_remove.insert(name.to_ascii_lowercase()) {
                            merged.remove.push(name.clone());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    result
}

fn build_path_modifier(modifier: &gw::HTTPPathModifier) -> Option<PathModifier> {
    match modifier.type_.as_str() {
        path_modifier_type::REPLACE_PREFIX_MATCH => modifier
            .replace_prefix_match
            .clone()
            .map(PathModifier::ReplacePrefixMatch),
        path_modifier_type::REPLACE_FULL_PATH => modifier
            .replace_full_path
            .clone()
            .map(PathModifier::ReplaceFullPath),
        _ => None,
    }
}
