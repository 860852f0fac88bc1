//! Builds a validated relationship graph from a cluster snapshot.
//!
//! The graph is rebuilt from scratch on every cluster-state change; nothing
//! is mutated incrementally. Nodes reference each other by [`ResourceId`]
//! only, so the structure has no ownership cycles.

pub(crate) mod backend_refs;
pub(crate) mod backend_tls_policy;
pub(crate) mod gatewayclass;
pub(crate) mod gateways;
pub(crate) mod hostnames;
pub(crate) mod resolvers;
pub(crate) mod routes;

pub use self::{
    backend_refs::BackendRef,
    backend_tls_policy::BackendTlsPolicy,
    gatewayclass::GatewayClass,
    gateways::{Gateway, Listener},
    resolvers::ResolveError,
    routes::{ParentRef, ParentRefAttachmentStatus, Route, Rule},
};

use crate::{ClusterState, ControllerConfig};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway as gw, Namespace, ResourceExt, SERVICE_NAME_LABEL,
};

/// A Secret referenced by a listener certificateRef. The entry exists even
/// when the Secret does not, so that its later creation is classified as
/// relevant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Secret {
    pub source: Option<nginx_gateway_controller_k8s_api::Secret>,
}

/// A ConfigMap referenced by a BackendTLSPolicy caCertRef, with the CA
/// certificate bytes when the ConfigMap held a decodable bundle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaCertConfigMap {
    pub source: Option<nginx_gateway_controller_k8s_api::ConfigMap>,
    pub ca_cert: Option<Vec<u8>>,
}

/// The relationship graph of one reconciliation.
#[derive(Debug, Default, PartialEq)]
pub struct Graph {
    /// The winning GatewayClass, absent when the configured class does not
    /// exist or names another controller.
    pub gateway_class: Option<GatewayClass>,
    /// The single winning Gateway for the class.
    pub gateway: Option<Gateway>,
    /// Classes naming this controller that lost winner selection.
    pub ignored_gateway_classes: HashMap<ResourceId, gw::GatewayClass>,
    /// Gateways of this class that lost winner selection.
    pub ignored_gateways: HashMap<ResourceId, gw::Gateway>,
    /// Routes with at least one parentRef naming a Gateway of this class.
    pub routes: HashMap<ResourceId, Route>,
    /// Secrets named by listener certificateRefs, existing or not.
    pub referenced_secrets: HashMap<ResourceId, Secret>,
    /// Namespaces whose labels matched a listener selector at build time.
    pub referenced_namespaces: HashMap<ResourceId, Namespace>,
    /// Services referenced by at least one route backendRef.
    pub referenced_services: HashSet<ResourceId>,
    /// ConfigMaps named by BackendTLSPolicy caCertRefs, existing or not.
    pub referenced_ca_cert_config_maps: HashMap<ResourceId, CaCertConfigMap>,
    /// Processed BackendTLSPolicies.
    pub backend_tls_policies: HashMap<ResourceId, BackendTlsPolicy>,
}

/// Builds a fresh [`Graph`] from a snapshot. The snapshot is read-only;
/// every validation failure lands as a condition on the owning node.
pub fn build_graph(state: &ClusterState, config: &ControllerConfig) -> Graph {
    let (processed_classes, _gc_exists) = gatewayclass::process_gateway_classes(
        &state.gateway_classes,
        &config.gateway_class_name,
        &config.controller_name,
    );

    let Some(winner) = processed_classes.winner else {
        // Either the configured class does not exist, or it names another
        // controller. Nothing of ours can be programmed.
        return Graph::default();
    };

    let gateway_class = gatewayclass::build_gateway_class(winner, &state.gateway_api_crds);

    let mut secret_resolver = resolvers::SecretResolver::new(&state.secrets);
    let mut config_map_resolver = resolvers::ConfigMapResolver::new(&state.config_maps);
    let ref_grant_resolver = resolvers::ReferenceGrantResolver::new(&state.reference_grants);

    let processed_gateways = gateways::process_gateways(
        &state.gateways,
        &config.gateway_class_name,
        config.gateway.as_ref(),
    );
    let gateway_ids = processed_gateways.all_ids();

    let mut gateway = gateways::build_gateway(
        processed_gateways.winner,
        &mut secret_resolver,
        Some(&gateway_class),
        &ref_grant_resolver,
        &config.protected_ports,
    );

    let mut backend_tls_policies = backend_tls_policy::process_backend_tls_policies(
        &state.backend_tls_policies,
        &mut config_map_resolver,
        &config.controller_name,
        gateway.as_ref(),
    );

    let mut routes = routes::build_routes_for_gateways(&state.http_routes, &gateway_ids);
    routes::bind_routes_to_listeners(
        &mut routes,
        gateway.as_mut(),
        &processed_gateways.ignored,
        &state.namespaces,
    );
    backend_refs::add_backend_refs_to_route_rules(
        &mut routes,
        &ref_grant_resolver,
        &state.services,
        &mut backend_tls_policies,
    );

    let referenced_namespaces = build_referenced_namespaces(&state.namespaces, gateway.as_ref());
    let referenced_services = build_referenced_services(&routes);

    Graph {
        gateway_class: Some(gateway_class),
        gateway,
        ignored_gateway_classes: processed_classes.ignored,
        ignored_gateways: processed_gateways.ignored,
        routes,
        referenced_secrets: secret_resolver.into_resolved_secrets(),
        referenced_namespaces,
        referenced_services,
        referenced_ca_cert_config_maps: config_map_resolver.into_resolved_config_maps(),
        backend_tls_policies,
    }
}

impl Graph {
    pub fn is_secret_referenced(&self, id: &ResourceId) -> bool {
        self.referenced_secrets.contains_key(id)
    }

    pub fn is_config_map_referenced(&self, id: &ResourceId) -> bool {
        self.referenced_ca_cert_config_maps.contains_key(id)
    }

    pub fn is_service_referenced(&self, id: &ResourceId) -> bool {
        self.referenced_services.contains(id)
    }

    /// An EndpointSlice is relevant when its owning Service (named by the
    /// `kubernetes.io/service-name` label, in the slice's namespace) is
    /// referenced. A slice without the label belongs to no Service.
    pub fn is_endpoint_slice_referenced(
        &self,
        slice: &nginx_gateway_controller_k8s_api::EndpointSlice,
    ) -> bool {
        let Some(service_name) = slice.labels().get(SERVICE_NAME_LABEL) else {
            return false;
        };
        let namespace = slice.namespace().unwrap_or_default();
        self.referenced_services
            .contains(&ResourceId::new(namespace, service_name.clone()))
    }

    /// A Namespace is relevant when the graph referenced it at build time
    /// (so a label removal unbinds it) or when its current labels match a
    /// listener selector (so a label addition binds it).
    pub fn is_namespace_referenced(&self, namespace: &Namespace) -> bool {
        let id = ResourceId::cluster_scoped(namespace.name_unchecked());
        if self.referenced_namespaces.contains_key(&id) {
            return true;
        }
        namespace_matches_gateway(namespace, self.gateway.as_ref())
    }
}

fn namespace_matches_gateway(namespace: &Namespace, gateway: Option<&Gateway>) -> bool {
    let Some(gateway) = gateway else {
        return false;
    };
    let labels = namespace.labels();
    gateway.listeners.iter().any(|l| {
        l.allowed_route_label_selector
            .as_ref()
            .is_some_and(|selector| selector.matches(labels))
    })
}

fn build_referenced_namespaces(
    namespaces: &HashMap<ResourceId, Namespace>,
    gateway: Option<&Gateway>,
) -> HashMap<ResourceId, Namespace> {
    namespaces
        .iter()
        .filter(|(_, ns)| namespace_matches_gateway(ns, gateway))
        .map(|(id, ns)| (id.clone(), ns.clone()))
        .collect()
}

fn build_referenced_services(routes: &HashMap<ResourceId, Route>) -> HashSet<ResourceId> {
    let mut services = HashSet::new();
    for route in routes.values() {
        for rule in &route.rules {
            for backend_ref in &rule.backend_refs {
                // Unresolved and unpermitted refs keep their service id so
                // that creating the Service or a grant triggers a rebuild.
                if let Some(id) = &backend_ref.svc_id {
                    services.insert(id.clone());
                }
            }
        }
    }
    services
}
