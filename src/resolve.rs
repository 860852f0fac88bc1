//! Resolves service ports to endpoint addresses by reading EndpointSlices.

use kube::api::ListParams;
use nginx_gateway_controller_core::{Endpoint, ResourceId, ServiceResolver};
use nginx_gateway_controller_k8s_api::{
    Api, Client, EndpointSlice, Service, SERVICE_NAME_LABEL,
};

pub struct EndpointSliceResolver {
    client: Client,
}

impl EndpointSliceResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ServiceResolver for EndpointSliceResolver {
    async fn resolve(&self, service: &ResourceId, port: i32) -> anyhow::Result<Vec<Endpoint>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let svc = services.get(&service.name).await?;

        // The slice ports carry the service port's name, which is empty for
        // single-port services.
        let port_name = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.port == port))
            .ok_or_else(|| anyhow::anyhow!("service {service} has no port {port}"))?
            .name
            .clone()
            .unwrap_or_default();

        let slices: Api<EndpointSlice> = Api::namespaced(self.client.clone(), &service.namespace);
        let params =
            ListParams::default().labels(&format!("{SERVICE_NAME_LABEL}={}", service.name));
        let slices = slices.list(&params).await?;

        let mut endpoints = Vec::new();
        for slice in slices.items {
            let Some(target_port) = slice.ports.iter().flatten().find_map(|p| {
                (p.name.clone().unwrap_or_default() == port_name).then_some(p.port).flatten()
            }) else {
                continue;
            };

            for endpoint in &slice.endpoints {
                let ready = endpoint
                    .conditions
                    .as_ref()
                    .and_then(|c| c.ready)
                    .unwrap_or(true);
                if !ready {
                    continue;
                }
                for address in &endpoint.addresses {
                    endpoints.push(Endpoint {
                        address: address.clone(),
                        port: target_port as u16,
                    });
                }
            }
        }

        if endpoints.is_empty() {
            anyhow::bail!("no ready endpoints for service {service} port {port}");
        }

        endpoints.sort();
        endpoints.dedup();
        Ok(endpoints)
    }
}
