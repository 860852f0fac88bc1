//! Adapters between the kubert watch machinery and the change processor.
//!
//! One `CaptureIndex` instance is shared by every watch; each indexing
//! impl translates apply/delete events into typed captures. Resets need no
//! special handling because captures are idempotent per object.

use crate::handler::SharedHandler;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway as gw, ConfigMap, EndpointSlice, Namespace, Secret, Service,
};
use nginx_gateway_controller_k8s_state::change::{Delete, Upsert};

/// Feeds watch events into the event handler.
pub struct CaptureIndex {
    handler: SharedHandler,
}

impl CaptureIndex {
    pub fn new(handler: SharedHandler) -> Self {
        Self { handler }
    }
}

macro_rules! namespaced_index {
    ($kind:ty, $upsert:path, $delete:path) => {
        impl kubert::index::IndexNamespacedResource<$kind> for CaptureIndex {
            fn apply(&mut self, resource: $kind) {
                self.handler.capture_upsert($upsert(resource));
            }

            fn delete(&mut self, namespace: String, name: String) {
                self.handler
                    .capture_delete($delete(ResourceId::new(namespace, name)));
            }
        }
    };
}

macro_rules! cluster_index {
    ($kind:ty, $upsert:path, $delete:path) => {
        impl kubert::index::IndexClusterResource<$kind> for CaptureIndex {
            fn apply(&mut self, resource: $kind) {
                self.handler.capture_upsert($upsert(resource));
            }

            fn delete(&mut self, name: String) {
                self.handler
                    .capture_delete($delete(ResourceId::cluster_scoped(name)));
            }
        }
    };
}

namespaced_index!(gw::Gateway, Upsert::Gateway, Delete::Gateway);
namespaced_index!(gw::HTTPRoute, Upsert::HttpRoute, Delete::HttpRoute);
namespaced_index!(gw::ReferenceGrant, Upsert::ReferenceGrant, Delete::ReferenceGrant);
namespaced_index!(
    gw::BackendTLSPolicy,
    Upsert::BackendTlsPolicy,
    Delete::BackendTlsPolicy
);
namespaced_index!(Service, Upsert::Service, Delete::Service);
namespaced_index!(Secret, Upsert::Secret, Delete::Secret);
namespaced_index!(ConfigMap, Upsert::ConfigMap, Delete::ConfigMap);
namespaced_index!(EndpointSlice, Upsert::EndpointSlice, Delete::EndpointSlice);

cluster_index!(gw::GatewayClass, Upsert::GatewayClass, Delete::GatewayClass);
cluster_index!(Namespace, Upsert::Namespace, Delete::Namespace);

// Only the Gateway API CRDs are interesting, and only their metadata: the
// bundle-version annotation gates the GatewayClass.
impl kubert::index::IndexClusterResource<CustomResourceDefinition> for CaptureIndex {
    fn apply(&mut self, resource: CustomResourceDefinition) {
        let name = resource.metadata.name.as_deref().unwrap_or_default();
        if name.ends_with(&format!(".{}", gw::GROUP_NAME)) {
            self.handler
                .capture_upsert(Upsert::CrdMetadata(resource.metadata));
        }
    }

    fn delete(&mut self, name: String) {
        if name.ends_with(&format!(".{}", gw::GROUP_NAME)) {
            self.handler
                .capture_delete(Delete::CrdMetadata(ResourceId::cluster_scoped(name)));
        }
    }
}
