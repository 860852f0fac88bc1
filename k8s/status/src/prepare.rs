//! Builds the status update requests for a graph.

use crate::UpdateRequest;
use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{gateway as gw, Time};
use nginx_gateway_controller_k8s_state::{conditions, graph};

/// The outcome of handing a configuration to the dataplane.
#[derive(Clone, Debug, Default)]
pub struct NginxReloadResult {
    /// Set when reloading NGINX failed; folded into the next status pass.
    pub error: Option<String>,
}

/// Prepares one request per route, covering every parentRef of the route.
pub fn prepare_route_requests(
    routes: &HashMap<ResourceId, graph::Route>,
    transition_time: &Time,
    reload: &NginxReloadResult,
    controller_name: &str,
) -> Vec<UpdateRequest> {
    let mut requests = Vec::with_capacity(routes.len());

    for (id, route) in routes {
        let mut parents = Vec::with_capacity(route.parent_refs.len());

        for parent_ref in &route.parent_refs {
            let mut conds = conditions::new_default_route_conditions();
            conds.extend(route.conditions.iter().cloned());

            if let Some(attachment) = &parent_ref.attachment {
                if !attachment.attached {
                    if let Some(failed) = &attachment.failed_condition {
                        conds.push(failed.clone());
                    }
                }
            }

            if reload.error.is_some() {
                conds.push(conditions::new_route_gateway_not_programmed(
                    conditions::route_message_failed_nginx_reload(),
                ));
            }

            let conds = conditions::deduplicate_conditions(conds);
            let api_conds = conditions::convert_conditions(
                &conds,
                route.source.metadata.generation.unwrap_or_default(),
                transition_time.clone(),
            );

            parents.push(gw::RouteParentStatus {
                parent_ref: gw::ParentReference {
                    namespace: Some(parent_ref.gateway.namespace.clone()),
                    name: parent_ref.gateway.name.clone(),
                    section_name: parent_ref.section_name.clone(),
                    ..Default::default()
                },
                controller_name: controller_name.to_string(),
                conditions: api_conds,
            });
        }

        requests.push(UpdateRequest::HttpRoute {
            id: id.clone(),
            status: gw::HTTPRouteStatus { parents },
            controller_name: controller_name.to_string(),
        });
    }

    sort_requests(&mut requests);
    requests
}

/// Prepares requests for the winning GatewayClass and every ignored one.
pub fn prepare_gateway_class_requests(
    gateway_class: Option<&graph::GatewayClass>,
    ignored: &HashMap<ResourceId, gw::GatewayClass>,
    transition_time: &Time,
) -> Vec<UpdateRequest> {
    let mut requests = Vec::new();

    if let Some(gc) = gateway_class {
        // Defaults go first so that the class's own conditions override
        // them during deduplication.
        let mut conds = conditions::new_default_gateway_class_conditions();
        conds.extend(gc.conditions.iter().cloned());
        let conds = conditions::deduplicate_conditions(conds);

        requests.push(UpdateRequest::GatewayClass {
            id: ResourceId::cluster_scoped(gc.source.metadata.name.clone().unwrap_or_default()),
            status: gw::GatewayClassStatus {
                conditions: conditions::convert_conditions(
                    &conds,
                    gc.source.metadata.generation.unwrap_or_default(),
                    transition_time.clone(),
                ),
            },
        });
    }

    for (id, gc) in ignored {
        requests.push(UpdateRequest::GatewayClass {
            id: id.clone(),
            status: gw::GatewayClassStatus {
                conditions: conditions::convert_conditions(
                    &[conditions::new_gateway_class_conflict()],
                    gc.metadata.generation.unwrap_or_default(),
                    transition_time.clone(),
                ),
            },
        });
    }

    sort_requests(&mut requests);
    requests
}

/// Prepares requests for the winning Gateway and every ignored one.
pub fn prepare_gateway_requests(
    gateway: Option<&graph::Gateway>,
    ignored: &HashMap<ResourceId, gw::Gateway>,
    transition_time: &Time,
    addresses: &[gw::GatewayStatusAddress],
    reload: &NginxReloadResult,
) -> Vec<UpdateRequest> {
    let mut requests = Vec::with_capacity(1 + ignored.len());

    if let Some(gateway) = gateway {
        requests.push(prepare_gateway_request(
            gateway,
            transition_time,
            addresses,
            reload,
        ));
    }

    for (id, gw_source) in ignored {
        requests.push(UpdateRequest::Gateway {
            id: id.clone(),
            status: gw::GatewayStatus {
                conditions: Some(conditions::convert_conditions(
                    &conditions::new_gateway_conflict(),
                    gw_source.metadata.generation.unwrap_or_default(),
                    transition_time.clone(),
                )),
                ..Default::default()
            },
        });
    }

    sort_requests(&mut requests);
    requests
}

fn prepare_gateway_request(
    gateway: &graph::Gateway,
    transition_time: &Time,
    addresses: &[gw::GatewayStatusAddress],
    reload: &NginxReloadResult,
) -> UpdateRequest {
    let generation = gateway.source.metadata.generation.unwrap_or_default();
    let id = ResourceId::new(
        gateway.source.metadata.namespace.clone().unwrap_or_default(),
        gateway.source.metadata.name.clone().unwrap_or_default(),
    );

    if !gateway.valid {
        let conds = conditions::deduplicate_conditions(gateway.conditions.clone());
        return UpdateRequest::Gateway {
            id,
            status: gw::GatewayStatus {
                conditions: Some(conditions::convert_conditions(
                    &conds,
                    generation,
                    transition_time.clone(),
                )),
                ..Default::default()
            },
        };
    }

    let mut listener_statuses = Vec::with_capacity(gateway.listeners.len());
    let mut valid_listener_count = 0;

    for listener in &gateway.listeners {
        let mut conds = if listener.valid {
            valid_listener_count += 1;
            conditions::new_default_listener_conditions()
        } else {
            listener.conditions.clone()
        };

        if reload.error.is_some() {
            conds.push(conditions::new_listener_not_programmed_invalid(
                conditions::LISTENER_MESSAGE_FAILED_NGINX_RELOAD,
            ));
        }

        let conds = conditions::deduplicate_conditions(conds);
        listener_statuses.push(gw::ListenerStatus {
            name: listener.name.clone(),
            supported_kinds: listener.supported_kinds.clone(),
            attached_routes: listener.routes.len() as i32,
            conditions: conditions::convert_conditions(
                &conds,
                generation,
                transition_time.clone(),
            ),
        });
    }

    let mut gw_conds = conditions::new_default_gateway_conditions();
    if valid_listener_count == 0 {
        gw_conds.extend(conditions::new_gateway_not_accepted_listeners_not_valid());
    } else if valid_listener_count < gateway.listeners.len() {
        gw_conds.push(conditions::new_gateway_accepted_listeners_not_valid());
    }

    if reload.error.is_some() {
        gw_conds.push(conditions::new_gateway_not_programmed_invalid(
            conditions::GATEWAY_MESSAGE_FAILED_NGINX_RELOAD,
        ));
    }

    let gw_conds = conditions::deduplicate_conditions(gw_conds);

    UpdateRequest::Gateway {
        id,
        status: gw::GatewayStatus {
            addresses: Some(addresses.to_vec()),
            conditions: Some(conditions::convert_conditions(
                &gw_conds,
                generation,
                transition_time.clone(),
            )),
            listeners: Some(listener_statuses),
        },
    }
}

/// Prepares a single-ancestor request for every referenced, non-ignored
/// policy.
pub fn prepare_backend_tls_policy_requests(
    policies: &HashMap<ResourceId, graph::BackendTlsPolicy>,
    transition_time: &Time,
    controller_name: &str,
) -> Vec<UpdateRequest> {
    let mut requests = Vec::with_capacity(policies.len());

    for (id, policy) in policies {
        if !policy.is_referenced || policy.ignored {
            continue;
        }

        let conds = conditions::deduplicate_conditions(policy.conditions.clone());
        let api_conds = conditions::convert_conditions(
            &conds,
            policy.source.metadata.generation.unwrap_or_default(),
            transition_time.clone(),
        );

        requests.push(UpdateRequest::BackendTlsPolicy {
            id: id.clone(),
            status: gw::PolicyStatus {
                ancestors: vec![gw::PolicyAncestorStatus {
                    ancestor_ref: gw::ParentReference {
                        namespace: Some(policy.gateway.namespace.clone()),
                        name: policy.gateway.name.clone(),
                        ..Default::default()
                    },
                    controller_name: controller_name.to_string(),
                    conditions: api_conds,
                }],
            },
            controller_name: controller_name.to_string(),
        });
    }

    sort_requests(&mut requests);
    requests
}

/// Requests sort by kind and id so that a rebuild emits them in a stable
/// order regardless of map iteration.
fn sort_requests(requests: &mut [UpdateRequest]) {
    requests.sort_by(|a, b| {
        a.kind()
            .cmp(b.kind())
            .then_with(|| a.id().cmp(b.id()))
    });
}
