//! The endpoint-resolution seam between the IR builder and the cluster.

use crate::ResourceId;

/// A single resolved backend address.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// Resolves a service port to the endpoints backing it.
///
/// Implementations typically read EndpointSlices. The IR builder records a
/// resolution failure on the upstream rather than failing the build.
#[async_trait::async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve(&self, service: &ResourceId, port: i32) -> anyhow::Result<Vec<Endpoint>>;
}
