//! The control-loop core: change tracking, graph construction and the
//! lowering of the graph into the dataplane IR.
//!
//! The state lives behind a single owner (the change processor); watch
//! events feed it captures, and each `process` call classifies the pending
//! captures and rebuilds the graph when cluster state changed. Rebuilds are
//! sequential and deterministic, which is what makes the status planner's
//! equality-based deduplication possible.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod change;
pub mod conditions;
pub mod dataplane;
pub mod graph;
pub mod sort;

#[cfg(test)]
mod test_util;
#[cfg(test)]
mod tests;

pub use self::change::{ChangeProcessor, ChangeType, Delete, Upsert};
pub use self::graph::{build_graph, Graph};

use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway as gw, ConfigMap, Namespace, ObjectMeta, Secret, Service,
};

/// Ports the controller reserves for itself, mapped to what they serve.
/// Listeners may not bind them.
pub type ProtectedPorts = HashMap<i32, String>;

/// The static identity and configuration of this controller instance.
#[derive(Clone, Debug, Default)]
pub struct ControllerConfig {
    /// The `controllerName` this controller answers to, in
    /// `<domain>/<path>` form.
    pub controller_name: String,
    /// Name of the GatewayClass this controller serves.
    pub gateway_class_name: String,
    /// When set, serve only this Gateway instead of running winner
    /// selection.
    pub gateway: Option<ResourceId>,
    pub protected_ports: ProtectedPorts,
}

/// The tracked cluster resources a graph is built from. Replaced piecemeal
/// by captures and read wholesale by rebuilds.
#[derive(Debug, Default)]
pub struct ClusterState {
    pub gateway_classes: HashMap<ResourceId, gw::GatewayClass>,
    pub gateways: HashMap<ResourceId, gw::Gateway>,
    pub http_routes: HashMap<ResourceId, gw::HTTPRoute>,
    pub services: HashMap<ResourceId, Service>,
    pub namespaces: HashMap<ResourceId, Namespace>,
    pub reference_grants: HashMap<ResourceId, gw::ReferenceGrant>,
    pub secrets: HashMap<ResourceId, Secret>,
    pub config_maps: HashMap<ResourceId, ConfigMap>,
    /// Partial metadata of the Gateway API CRDs themselves, for the
    /// bundle-version gate.
    pub gateway_api_crds: HashMap<ResourceId, ObjectMeta>,
    pub backend_tls_policies: HashMap<ResourceId, gw::BackendTLSPolicy>,
}
