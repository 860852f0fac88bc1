//! Classifies captured cluster events into the rebuild decision.
//!
//! Captures mutate the tracked [`ClusterState`] and raise one of two pending
//! flags. `process` consumes the flags atomically: a cluster-state change
//! rebuilds the graph, an endpoints-only change re-resolves upstreams, and
//! everything else is a no-op. The tracker is deliberately conservative; a
//! "related" change that turns out to produce identical statuses is
//! deduplicated later by the status planner, not here.

use crate::{build_graph, ClusterState, ControllerConfig, Graph};
use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway as gw, ConfigMap, EndpointSlice, Namespace, ObjectMeta, ResourceExt, Secret, Service,
    BUNDLE_VERSION_ANNOTATION, SERVICE_NAME_LABEL,
};
use std::sync::Arc;

/// What the next reconcile has to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    NoChange,
    /// Only endpoints of already-referenced Services changed; servers and
    /// backend groups are untouched.
    EndpointsOnlyChange,
    /// Tracked resources changed; the graph must be rebuilt.
    ClusterStateChange,
}

/// An observed create-or-update of a tracked resource.
#[derive(Clone, Debug)]
pub enum Upsert {
    GatewayClass(gw::GatewayClass),
    Gateway(gw::Gateway),
    HttpRoute(gw::HTTPRoute),
    Service(Service),
    Namespace(Namespace),
    ReferenceGrant(gw::ReferenceGrant),
    Secret(Secret),
    ConfigMap(ConfigMap),
    /// Partial metadata of a Gateway API CRD.
    CrdMetadata(ObjectMeta),
    BackendTlsPolicy(gw::BackendTLSPolicy),
    EndpointSlice(EndpointSlice),
}

/// An observed deletion of a tracked resource, by key.
#[derive(Clone, Debug)]
pub enum Delete {
    GatewayClass(ResourceId),
    Gateway(ResourceId),
    HttpRoute(ResourceId),
    Service(ResourceId),
    Namespace(ResourceId),
    ReferenceGrant(ResourceId),
    Secret(ResourceId),
    ConfigMap(ResourceId),
    CrdMetadata(ResourceId),
    BackendTlsPolicy(ResourceId),
    EndpointSlice(ResourceId),
}

/// Tracks cluster state and turns captures into rebuild decisions.
///
/// Single-owner: captures and `process` are serialized by the caller (the
/// event handler holds it behind one mutex).
pub struct ChangeProcessor {
    config: ControllerConfig,
    state: ClusterState,
    /// Slice key to owning Service key, so slice deletions can be
    /// classified after the slice itself is gone.
    endpoint_slice_owners: HashMap<ResourceId, ResourceId>,
    cluster_state_changed: bool,
    endpoints_changed: bool,
    latest_graph: Option<Arc<Graph>>,
}

impl ChangeProcessor {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            state: ClusterState::default(),
            endpoint_slice_owners: HashMap::new(),
            cluster_state_changed: false,
            endpoints_changed: false,
            latest_graph: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The graph of the last completed rebuild, for read-only queries.
    pub fn latest_graph(&self) -> Option<&Arc<Graph>> {
        self.latest_graph.as_ref()
    }

    pub fn capture_upsert(&mut self, upsert: Upsert) {
        match upsert {
            Upsert::GatewayClass(gc) => {
                let id = ResourceId::cluster_scoped(gc.name_unchecked());
                self.state.gateway_classes.insert(id, gc);
                self.cluster_state_changed = true;
            }
            Upsert::Gateway(gateway) => {
                let id = namespaced_id(&gateway.metadata);
                self.state.gateways.insert(id, gateway);
                self.cluster_state_changed = true;
            }
            Upsert::HttpRoute(route) => {
                let id = namespaced_id(&route.metadata);
                self.state.http_routes.insert(id, route);
                self.cluster_state_changed = true;
            }
            Upsert::ReferenceGrant(grant) => {
                let id = namespaced_id(&grant.metadata);
                self.state.reference_grants.insert(id, grant);
                self.cluster_state_changed = true;
            }
            Upsert::BackendTlsPolicy(policy) => {
                let id = namespaced_id(&policy.metadata);
                self.state.backend_tls_policies.insert(id, policy);
                self.cluster_state_changed = true;
            }
            Upsert::Secret(secret) => {
                let id = namespaced_id(&secret.metadata);
                if self.graph_references(|g| g.is_secret_referenced(&id)) {
                    self.cluster_state_changed = true;
                }
                self.state.secrets.insert(id, secret);
            }
            Upsert::ConfigMap(config_map) => {
                let id = namespaced_id(&config_map.metadata);
                if self.graph_references(|g| g.is_config_map_referenced(&id)) {
                    self.cluster_state_changed = true;
                }
                self.state.config_maps.insert(id, config_map);
            }
            Upsert::Service(service) => {
                let id = namespaced_id(&service.metadata);
                if self.graph_references(|g| g.is_service_referenced(&id)) {
                    self.cluster_state_changed = true;
                }
                self.state.services.insert(id, service);
            }
            Upsert::Namespace(namespace) => {
                let id = ResourceId::cluster_scoped(namespace.name_unchecked());
                if self.graph_references(|g| g.is_namespace_referenced(&namespace)) {
                    self.cluster_state_changed = true;
                }
                self.state.namespaces.insert(id, namespace);
            }
            Upsert::CrdMetadata(metadata) => {
                let id = ResourceId::cluster_scoped(metadata.name.clone().unwrap_or_default());
                // Only the bundle-version annotation matters; re-asserting
                // the same value is a no-op.
                let old_version = self
                    .state
                    .gateway_api_crds
                    .get(&id)
                    .and_then(bundle_version);
                if bundle_version(&metadata) != old_version {
                    self.cluster_state_changed = true;
                }
                self.state.gateway_api_crds.insert(id, metadata);
            }
            Upsert::EndpointSlice(slice) => {
                // A slice without the service-name label belongs to no
                // Service and is ignored.
                let Some(service_name) = slice.labels().get(SERVICE_NAME_LABEL).cloned() else {
                    return;
                };
                let slice_id = namespaced_id(&slice.metadata);
                let service_id = ResourceId::new(slice_id.namespace.clone(), service_name);
                if self.graph_references(|g| g.is_service_referenced(&service_id)) {
                    self.endpoints_changed = true;
                }
                self.endpoint_slice_owners.insert(slice_id, service_id);
            }
        }
    }

    pub fn capture_delete(&mut self, delete: Delete) {
        match delete {
            Delete::GatewayClass(id) => {
                if self.state.gateway_classes.remove(&id).is_some() {
                    self.cluster_state_changed = true;
                }
            }
            Delete::Gateway(id) => {
                if self.state.gateways.remove(&id).is_some() {
                    self.cluster_state_changed = true;
                }
            }
            Delete::HttpRoute(id) => {
                if self.state.http_routes.remove(&id).is_some() {
                    self.cluster_state_changed = true;
                }
            }
            Delete::ReferenceGrant(id) => {
                if self.state.reference_grants.remove(&id).is_some() {
                    self.cluster_state_changed = true;
                }
            }
            Delete::BackendTlsPolicy(id) => {
                if self.state.backend_tls_policies.remove(&id).is_some() {
                    self.cluster_state_changed = true;
                }
            }
            Delete::Secret(id) => {
                if self.state.secrets.remove(&id).is_some()
                    && self.graph_references(|g| g.is_secret_referenced(&id))
                {
                    self.cluster_state_changed = true;
                }
            }
            Delete::ConfigMap(id) => {
                if self.state.config_maps.remove(&id).is_some()
                    && self.graph_references(|g| g.is_config_map_referenced(&id))
                {
                    self.cluster_state_changed = true;
                }
            }
            Delete::Service(id) => {
                if self.state.services.remove(&id).is_some()
                    && self.graph_references(|g| g.is_service_referenced(&id))
                {
                    self.cluster_state_changed = true;
                }
            }
            Delete::Namespace(id) => {
                if self.state.namespaces.remove(&id).is_some()
                    && self
                        .graph_references(|g| g.referenced_namespaces.contains_key(&id))
                {
                    self.cluster_state_changed = true;
                }
            }
            Delete::CrdMetadata(id) => {
                if self.state.gateway_api_crds.remove(&id).is_some() {
                    self.cluster_state_changed = true;
                }
            }
            Delete::EndpointSlice(id) => {
                if let Some(service_id) = self.endpoint_slice_owners.remove(&id) {
                    if self.graph_references(|g| g.is_service_referenced(&service_id)) {
                        self.endpoints_changed = true;
                    }
                }
            }
        }
    }

    /// Consumes the pending flags and, on a cluster-state change, rebuilds
    /// the graph. A cluster-state change subsumes a pending endpoints-only
    /// change.
    pub fn process(&mut self) -> (ChangeType, Option<Arc<Graph>>) {
        let cluster = std::mem::take(&mut self.cluster_state_changed);
        let endpoints = std::mem::take(&mut self.endpoints_changed);

        if cluster {
            let graph = Arc::new(build_graph(&self.state, &self.config));
            self.latest_graph = Some(graph.clone());
            return (ChangeType::ClusterStateChange, Some(graph));
        }
        if endpoints {
            return (ChangeType::EndpointsOnlyChange, self.latest_graph.clone());
        }
        (ChangeType::NoChange, None)
    }

    fn graph_references(&self, f: impl FnOnce(&Graph) -> bool) -> bool {
        self.latest_graph.as_deref().map(f).unwrap_or(false)
    }
}

fn namespaced_id(metadata: &ObjectMeta) -> ResourceId {
    ResourceId::new(
        metadata.namespace.clone().unwrap_or_default(),
        metadata.name.clone().unwrap_or_default(),
    )
}

fn bundle_version(metadata: &ObjectMeta) -> Option<&String> {
    metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(BUNDLE_VERSION_ANNOTATION))
}
