//! End-to-end scenarios over the full build pipeline: snapshot to graph to
//! dataplane configuration.

use crate::{
    build_graph,
    change::{ChangeProcessor, ChangeType, Upsert},
    dataplane::{build_configuration, build_upstreams},
    test_util::{self, CLASS_NAME, CONTROLLER_NAME},
    ClusterState, ControllerConfig,
};
use nginx_gateway_controller_core::{
    dataplane::{Configuration, PathType, WILDCARD_HOSTNAME},
    resolve::{Endpoint, ServiceResolver},
    ResourceId,
};
use nginx_gateway_controller_k8s_api::gateway as gw;

fn config() -> ControllerConfig {
    ControllerConfig {
        controller_name: CONTROLLER_NAME.to_string(),
        gateway_class_name: CLASS_NAME.to_string(),
        gateway: None,
        protected_ports: crate::ProtectedPorts::from_iter([(9113, "MetricsPort".to_string())]),
    }
}

struct StaticResolver(Vec<Endpoint>);

#[async_trait::async_trait]
impl ServiceResolver for StaticResolver {
    async fn resolve(&self, _: &ResourceId, _: i32) -> anyhow::Result<Vec<Endpoint>> {
        Ok(self.0.clone())
    }
}

struct FailingResolver;

#[async_trait::async_trait]
impl ServiceResolver for FailingResolver {
    async fn resolve(&self, service: &ResourceId, _: i32) -> anyhow::Result<Vec<Endpoint>> {
        anyhow::bail!("failed to resolve endpoints for {service}")
    }
}

fn resolver() -> StaticResolver {
    StaticResolver(vec![Endpoint {
        address: "10.0.0.1".to_string(),
        port: 8080,
    }])
}

/// The snapshot of scenario S2: a class, a gateway with one HTTP listener,
/// and a route to a cross-namespace service with neither grant nor service
/// present.
fn s2_snapshot() -> ClusterState {
    let mut state = ClusterState::default();
    state.gateway_classes.insert(
        ResourceId::cluster_scoped(CLASS_NAME),
        test_util::gateway_class(CLASS_NAME, CONTROLLER_NAME),
    );

    let mut gateway = test_util::gateway("test", "gateway-1", CLASS_NAME, 100);
    gateway.spec.listeners = vec![test_util::http_listener("listener-80-1", 80)];
    state
        .gateways
        .insert(ResourceId::new("test", "gateway-1"), gateway);

    let mut route = test_util::http_route("test", "hr-1", "gateway-1", &["foo.example.com"]);
    let mut rule = test_util::route_rule_with_path("/");
    rule.backend_refs = Some(vec![test_util::backend_ref(
        Some("service-ns"),
        "service",
        Some(80),
        None,
    )]);
    route.spec.rules = Some(vec![rule]);
    state.http_routes.insert(ResourceId::new("test", "hr-1"), route);

    state
}

#[tokio::test]
async fn s1_an_empty_snapshot_produces_an_empty_graph_and_configuration() {
    let state = ClusterState::default();
    let graph = build_graph(&state, &config());

    assert_eq!(graph, crate::Graph::default());

    let configuration = build_configuration(&graph, &resolver(), 1).await;
    assert_eq!(
        configuration,
        Configuration {
            version: 1,
            ..Default::default()
        }
    );
}

#[test]
fn graph_builds_are_deterministic() {
    let state = s2_snapshot();
    let reference = build_graph(&state, &config());

    // Maps hash with per-instance random state, so rebuilding from a
    // re-captured snapshot exercises different iteration orders.
    for _ in 0..50 {
        let mut other = ClusterState::default();
        for (id, gc) in &state.gateway_classes {
            other.gateway_classes.insert(id.clone(), gc.clone());
        }
        for (id, gateway) in &state.gateways {
            other.gateways.insert(id.clone(), gateway.clone());
        }
        for (id, route) in &state.http_routes {
            other.http_routes.insert(id.clone(), route.clone());
        }

        assert_eq!(build_graph(&other, &config()), reference);
    }
}

#[tokio::test]
async fn s2_an_unpermitted_backend_still_binds_and_is_referenced() {
    let state = s2_snapshot();
    let graph = build_graph(&state, &config());

    let route = &graph.routes[&ResourceId::new("test", "hr-1")];
    let attachment = route.parent_refs[0].attachment.as_ref().unwrap();
    assert!(attachment.attached);
    assert_eq!(
        attachment.accepted_hostnames["listener-80-1"],
        vec!["foo.example.com"]
    );

    // ResolvedRefs=False/RefNotPermitted lands on the route.
    assert!(route
        .conditions
        .iter()
        .any(|c| c.type_ == "ResolvedRefs" && c.reason == "RefNotPermitted"));

    // The service is referenced even though the ref is not permitted.
    assert!(graph
        .referenced_services
        .contains(&ResourceId::new("service-ns", "service")));

    let configuration = build_configuration(&graph, &resolver(), 1).await;

    assert_eq!(configuration.http_servers.len(), 2);
    assert!(configuration.http_servers[0].is_default);
    assert_eq!(configuration.http_servers[0].port, 80);

    let server = &configuration.http_servers[1];
    assert_eq!(server.hostname, "foo.example.com");
    assert_eq!(server.path_rules.len(), 1);
    assert_eq!(server.path_rules[0].path, "/");
    assert_eq!(server.path_rules[0].path_type, PathType::Prefix);

    let group = &server.path_rules[0].match_rules[0].backend_group;
    assert_eq!(group.backends.len(), 1);
    assert!(!group.backends[0].valid);

    // Invalid backends produce no upstream.
    assert!(configuration.upstreams.is_empty());
}

#[tokio::test]
async fn s3_a_grant_and_a_service_make_the_backend_valid() {
    let mut state = s2_snapshot();
    state
        .reference_grants
        .extend(test_util::service_grant("service-ns", "test", None));
    let (id, service) = test_util::service_with_port("service-ns", "service", 80);
    state.services.insert(id, service);

    let graph = build_graph(&state, &config());

    let route = &graph.routes[&ResourceId::new("test", "hr-1")];
    assert!(
        !route.conditions.iter().any(|c| c.type_ == "ResolvedRefs"),
        "no ResolvedRefs failure expected: {:?}",
        route.conditions,
    );

    let backend = &route.rules[0].backend_refs[0];
    assert!(backend.valid);
    assert_eq!(backend.svc_id, Some(ResourceId::new("service-ns", "service")));

    let configuration = build_configuration(&graph, &resolver(), 1).await;
    let server = &configuration.http_servers[1];
    let group = &server.path_rules[0].match_rules[0].backend_group;
    assert!(group.backends[0].valid);
    assert_eq!(group.backends[0].upstream_name, "service-ns_service_80");

    assert_eq!(configuration.upstreams.len(), 1);
    assert_eq!(configuration.upstreams[0].name, "service-ns_service_80");
    assert_eq!(
        configuration.upstreams[0].endpoints,
        vec![Endpoint {
            address: "10.0.0.1".to_string(),
            port: 8080,
        }]
    );
}

#[test]
fn s4_the_newer_gateway_is_ignored_and_its_routes_told_so() {
    let mut state = s2_snapshot();
    state.gateways.insert(
        ResourceId::new("test", "gateway-2"),
        test_util::gateway("test", "gateway-2", CLASS_NAME, 200),
    );
    state.http_routes.insert(
        ResourceId::new("test", "hr-2"),
        test_util::http_route("test", "hr-2", "gateway-2", &["bar.example.com"]),
    );

    let graph = build_graph(&state, &config());

    assert_eq!(
        graph.gateway.as_ref().map(|gateway| gateway.id()),
        Some(ResourceId::new("test", "gateway-1"))
    );
    assert!(graph
        .ignored_gateways
        .contains_key(&ResourceId::new("test", "gateway-2")));

    let route = &graph.routes[&ResourceId::new("test", "hr-2")];
    let attachment = route.parent_refs[0].attachment.as_ref().unwrap();
    assert!(!attachment.attached);
    let failed = attachment.failed_condition.as_ref().unwrap();
    assert_eq!(failed.type_, "TODO");
    assert!(failed.message.contains("Gateway is ignored"));
}

#[tokio::test]
async fn s5_an_unpermitted_certificate_keeps_the_listener_attachable() {
    let mut state = s2_snapshot();
    let gateway = state
        .gateways
        .get_mut(&ResourceId::new("test", "gateway-1"))
        .unwrap();
    gateway.spec.listeners = vec![test_util::https_listener(
        "listener-443-1",
        443,
        "secret-ns",
        "secret-1",
    )];
    let (id, secret) = test_util::tls_secret("secret-ns", "secret-1");
    state.secrets.insert(id.clone(), secret);

    let graph = build_graph(&state, &config());

    let listener = &graph.gateway.as_ref().unwrap().listeners[0];
    assert!(!listener.valid);
    assert!(listener.attachable);
    assert!(listener
        .conditions
        .iter()
        .any(|c| c.reason == "RefNotPermitted"));

    // The route still binds with its hostname.
    let route = &graph.routes[&ResourceId::new("test", "hr-1")];
    let attachment = route.parent_refs[0].attachment.as_ref().unwrap();
    assert!(attachment.attached);
    assert_eq!(
        attachment.accepted_hostnames["listener-443-1"],
        vec!["foo.example.com"]
    );

    // The secret is referenced so that a grant creation triggers a rebuild.
    assert!(graph.referenced_secrets.contains_key(&id));

    // No SSL server is generated for the invalid listener.
    let configuration = build_configuration(&graph, &resolver(), 1).await;
    assert!(configuration.ssl_servers.is_empty());
    assert!(configuration.ssl_key_pairs.is_empty());
}

#[tokio::test]
async fn s6_listeners_sharing_a_port_duplicate_match_rules_per_listener() {
    let mut state = s2_snapshot();
    let gateway = state
        .gateways
        .get_mut(&ResourceId::new("test", "gateway-1"))
        .unwrap();
    let mut with_hostname = test_util::https_listener("listener-443-1", 443, "test", "secret-2");
    with_hostname.hostname = Some("example.com".to_string());
    let without_hostname = test_util::https_listener("listener-443-2", 443, "test", "secret-1");
    gateway.spec.listeners = vec![with_hostname, without_hostname];

    for fixture in [
        test_util::tls_secret("test", "secret-1"),
        test_util::tls_secret("test", "secret-2"),
    ] {
        state.secrets.insert(fixture.0, fixture.1);
    }

    state.http_routes.clear();
    state.http_routes.insert(
        ResourceId::new("test", "https-hr-5"),
        test_util::http_route("test", "https-hr-5", "gateway-1", &["example.com"]),
    );

    let graph = build_graph(&state, &config());
    let configuration = build_configuration(&graph, &resolver(), 1).await;

    // Default server, example.com, and the catch-all.
    assert_eq!(configuration.ssl_servers.len(), 3);

    let server = configuration
        .ssl_servers
        .iter()
        .find(|s| s.hostname == "example.com")
        .unwrap();
    // Both listeners accepted the route, so its match rule appears twice.
    assert_eq!(server.path_rules.len(), 1);
    assert_eq!(server.path_rules[0].match_rules.len(), 2);
    // The keypair comes from the more specific listener.
    assert_eq!(
        server.ssl.as_ref().unwrap().key_pair_id,
        "ssl_keypair_test_secret-2"
    );

    let catch_all = configuration
        .ssl_servers
        .iter()
        .find(|s| s.hostname == WILDCARD_HOSTNAME)
        .unwrap();
    assert_eq!(
        catch_all.ssl.as_ref().unwrap().key_pair_id,
        "ssl_keypair_test_secret-1"
    );

    assert_eq!(configuration.ssl_key_pairs.len(), 2);
}

#[tokio::test]
async fn s7_endpoint_deltas_leave_servers_and_groups_untouched() {
    let mut processor = ChangeProcessor::new(config());

    let state = {
        let mut state = s2_snapshot();
        state
            .reference_grants
            .extend(test_util::service_grant("service-ns", "test", None));
        let (id, service) = test_util::service_with_port("service-ns", "service", 80);
        state.services.insert(id, service);
        state
    };

    processor.capture_upsert(Upsert::GatewayClass(
        state.gateway_classes[&ResourceId::cluster_scoped(CLASS_NAME)].clone(),
    ));
    processor.capture_upsert(Upsert::Gateway(
        state.gateways[&ResourceId::new("test", "gateway-1")].clone(),
    ));
    processor.capture_upsert(Upsert::HttpRoute(
        state.http_routes[&ResourceId::new("test", "hr-1")].clone(),
    ));
    for grant in state.reference_grants.values() {
        processor.capture_upsert(Upsert::ReferenceGrant(grant.clone()));
    }
    processor.capture_upsert(Upsert::Service(
        state.services[&ResourceId::new("service-ns", "service")].clone(),
    ));

    let (change, graph) = processor.process();
    assert_eq!(change, ChangeType::ClusterStateChange);
    let graph = graph.unwrap();

    let mut configuration = build_configuration(&graph, &resolver(), 1).await;

    // An EndpointSlice for the referenced service is endpoints-only.
    let slice = nginx_gateway_controller_k8s_api::EndpointSlice {
        metadata: nginx_gateway_controller_k8s_api::ObjectMeta {
            namespace: Some("service-ns".to_string()),
            name: Some("service-abc".to_string()),
            labels: Some(
                [(
                    nginx_gateway_controller_k8s_api::SERVICE_NAME_LABEL.to_string(),
                    "service".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };
    processor.capture_upsert(Upsert::EndpointSlice(slice));

    let (change, graph) = processor.process();
    assert_eq!(change, ChangeType::EndpointsOnlyChange);
    let graph = graph.unwrap();

    // The handler only swaps upstreams and bumps the version.
    let before = configuration.clone();
    let new_endpoints = StaticResolver(vec![Endpoint {
        address: "10.0.0.2".to_string(),
        port: 9090,
    }]);
    configuration.upstreams = build_upstreams(&graph, &new_endpoints).await;
    configuration.version += 1;

    assert_eq!(configuration.http_servers, before.http_servers);
    assert_eq!(configuration.ssl_servers, before.ssl_servers);
    assert_eq!(configuration.backend_groups, before.backend_groups);
    assert_ne!(configuration.upstreams, before.upstreams);
    assert_eq!(configuration.upstreams[0].endpoints[0].address, "10.0.0.2");
}

#[tokio::test]
async fn resolution_failures_land_on_the_upstream() {
    let mut state = s2_snapshot();
    state
        .reference_grants
        .extend(test_util::service_grant("service-ns", "test", None));
    let (id, service) = test_util::service_with_port("service-ns", "service", 80);
    state.services.insert(id, service);

    let graph = build_graph(&state, &config());
    let configuration = build_configuration(&graph, &FailingResolver, 1).await;

    assert_eq!(configuration.upstreams.len(), 1);
    assert!(configuration.upstreams[0].endpoints.is_empty());
    assert!(configuration.upstreams[0]
        .error_msg
        .as_ref()
        .unwrap()
        .contains("service-ns/service"));

    // The servers still point at the group; the dataplane answers 500.
    assert_eq!(configuration.http_servers.len(), 2);
}

#[tokio::test]
async fn identical_backend_groups_are_deduplicated_across_servers() {
    let mut state = s2_snapshot();
    state
        .reference_grants
        .extend(test_util::service_grant("service-ns", "test", None));
    let (id, service) = test_util::service_with_port("service-ns", "service", 80);
    state.services.insert(id, service);

    // Two hostnames on the same route produce two servers sharing the rule.
    let route = state
        .http_routes
        .get_mut(&ResourceId::new("test", "hr-1"))
        .unwrap();
    route.spec.hostnames = Some(vec![
        "foo.example.com".to_string(),
        "bar.example.com".to_string(),
    ]);

    let graph = build_graph(&state, &config());
    let configuration = build_configuration(&graph, &resolver(), 1).await;

    assert_eq!(configuration.http_servers.len(), 3);
    assert_eq!(configuration.backend_groups.len(), 1);
}

#[test]
fn a_restricted_gateway_overrides_winner_selection() {
    let mut state = s2_snapshot();
    state.gateways.insert(
        ResourceId::new("test", "gateway-2"),
        test_util::gateway("test", "gateway-2", CLASS_NAME, 200),
    );

    let mut restricted = config();
    restricted.gateway = Some(ResourceId::new("test", "gateway-2"));

    let graph = build_graph(&state, &restricted);
    assert_eq!(
        graph.gateway.as_ref().map(|gateway| gateway.id()),
        Some(ResourceId::new("test", "gateway-2"))
    );
    assert!(graph.ignored_gateways.is_empty());
}

#[test]
fn protected_ports_reject_listeners() {
    let mut state = s2_snapshot();
    let gateway = state
        .gateways
        .get_mut(&ResourceId::new("test", "gateway-1"))
        .unwrap();
    gateway.spec.listeners = vec![test_util::http_listener("listener-9113", 9113)];

    let graph = build_graph(&state, &config());
    let listener = &graph.gateway.as_ref().unwrap().listeners[0];
    assert!(!listener.valid);
    assert!(listener
        .conditions
        .iter()
        .any(|c| c.reason == "UnsupportedValue" && c.message.contains("MetricsPort")));
}

#[test]
fn namespace_selectors_project_referenced_namespaces() {
    let mut state = s2_snapshot();
    let gateway = state
        .gateways
        .get_mut(&ResourceId::new("test", "gateway-1"))
        .unwrap();
    let mut listener = test_util::http_listener("listener-80-1", 80);
    listener.allowed_routes = Some(gw::AllowedRoutes {
        namespaces: Some(gw::RouteNamespaces {
            from: Some(gw::from_namespaces::SELECTOR.to_string()),
            selector: Some(nginx_gateway_controller_k8s_api::LabelSelector {
                match_labels: Some(
                    [("team".to_string(), "shop".to_string())].into_iter().collect(),
                ),
                match_expressions: None,
            }),
        }),
        kinds: None,
    });
    gateway.spec.listeners = vec![listener];

    for fixture in [
        test_util::namespace_with_labels("allowed", &[("team", "shop")]),
        test_util::namespace_with_labels("denied", &[("team", "search")]),
    ] {
        state.namespaces.insert(fixture.0, fixture.1);
    }

    let graph = build_graph(&state, &config());

    assert!(graph
        .referenced_namespaces
        .contains_key(&ResourceId::cluster_scoped("allowed")));
    assert!(!graph
        .referenced_namespaces
        .contains_key(&ResourceId::cluster_scoped("denied")));
}
