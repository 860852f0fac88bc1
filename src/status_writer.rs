//! Applies status update requests to the API server with fetch-modify-write
//! and conflict retry. Each request's setter decides whether a write is
//! needed at all; a no-op reconcile issues zero writes.

use kube::api::PostParams;
use kubert::lease::Claim;
use nginx_gateway_controller_k8s_api::{gateway as gw, Api, Client, Resource};
use nginx_gateway_controller_k8s_status::UpdateRequest;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

const CONFLICT_RETRIES: usize = 3;

pub struct StatusWriter {
    client: Client,
    /// When leader election is enabled, only the claim holder writes.
    claims: Option<watch::Receiver<Arc<Claim>>>,
    identity: String,
}

impl StatusWriter {
    pub fn new(
        client: Client,
        claims: Option<watch::Receiver<Arc<Claim>>>,
        identity: String,
    ) -> Self {
        Self {
            client,
            claims,
            identity,
        }
    }

    pub async fn apply(&self, requests: Vec<UpdateRequest>) {
        if let Some(claims) = &self.claims {
            if !claims.borrow().is_current_for(&self.identity) {
                debug!("not the leader; skipping status updates");
                return;
            }
        }

        for request in requests {
            if let Err(error) = self.apply_one(&request).await {
                warn!(
                    kind = request.kind(),
                    id = %request.id(),
                    %error,
                    "failed to update status",
                );
            }
        }
    }

    async fn apply_one(&self, request: &UpdateRequest) -> anyhow::Result<()> {
        let id = request.id();
        match request {
            UpdateRequest::GatewayClass { .. } => {
                let api: Api<gw::GatewayClass> = Api::all(self.client.clone());
                self.write(api, &id.name, |gc| request.apply_to_gateway_class(gc))
                    .await
            }
            UpdateRequest::Gateway { .. } => {
                let api: Api<gw::Gateway> = Api::namespaced(self.client.clone(), &id.namespace);
                self.write(api, &id.name, |gateway| request.apply_to_gateway(gateway))
                    .await
            }
            UpdateRequest::HttpRoute { .. } => {
                let api: Api<gw::HTTPRoute> = Api::namespaced(self.client.clone(), &id.namespace);
                self.write(api, &id.name, |route| request.apply_to_http_route(route))
                    .await
            }
            UpdateRequest::BackendTlsPolicy { .. } => {
                let api: Api<gw::BackendTLSPolicy> =
                    Api::namespaced(self.client.clone(), &id.namespace);
                self.write(api, &id.name, |policy| {
                    request.apply_to_backend_tls_policy(policy)
                })
                .await
            }
        }
    }

    async fn write<K>(
        &self,
        api: Api<K>,
        name: &str,
        set: impl Fn(&mut K) -> bool,
    ) -> anyhow::Result<()>
    where
        K: Resource + Clone + std::fmt::Debug + DeserializeOwned + Serialize,
    {
        for _ in 0..CONFLICT_RETRIES {
            let mut object = api.get(name).await?;
            if !set(&mut object) {
                return Ok(());
            }

            match api
                .replace_status(name, &PostParams::default(), serde_json::to_vec(&object)?)
                .await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(response)) if response.code == 409 => {
                    debug!(name, "conflict while updating status; retrying");
                    continue;
                }
                Err(error) => return Err(error.into()),
            }
        }

        anyhow::bail!("exhausted conflict retries for {name}")
    }
}
