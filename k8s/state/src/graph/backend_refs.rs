use super::{
    backend_tls_policy::BackendTlsPolicy,
    resolvers::{from_http_route, to_service, ReferenceGrantResolver},
    routes::Route,
};
use crate::{
    conditions::{self, Condition},
    sort,
};
use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway::{self as gw, is_core_group},
    ResourceExt, Service, ServicePort,
};

const MIN_WEIGHT: i32 = 0;
const MAX_WEIGHT: i32 = 1_000_000;

/// The resolved form of one backendRef of a route rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendRef {
    /// The referenced Service, kept even when the ref is invalid so that a
    /// later Service or grant creation triggers a rebuild. Empty only when
    /// the ref does not name a Service at all.
    pub svc_id: Option<ResourceId>,
    /// The matched port of the Service.
    pub service_port: ServicePort,
    /// Effective weight; out-of-range weights carry no traffic.
    pub weight: i32,
    /// Invalid refs produce a backend that answers with an error.
    pub valid: bool,
    /// The BackendTLSPolicy selecting this backend's Service, by key.
    pub backend_tls_policy: Option<ResourceId>,
}

/// Resolves and validates the backendRefs of every valid route, adding
/// failure conditions to the owning route.
pub(crate) fn add_backend_refs_to_route_rules(
    routes: &mut HashMap<ResourceId, Route>,
    ref_grant_resolver: &ReferenceGrantResolver,
    services: &HashMap<ResourceId, Service>,
    policies: &mut HashMap<ResourceId, BackendTlsPolicy>,
) {
    for route in routes.values_mut() {
        add_backend_refs_to_rules(route, ref_grant_resolver, services, policies);
    }
}

fn add_backend_refs_to_rules(
    route: &mut Route,
    ref_grant_resolver: &ReferenceGrantResolver,
    services: &HashMap<ResourceId, Service>,
    policies: &mut HashMap<ResourceId, BackendTlsPolicy>,
) {
    if !route.valid {
        return;
    }

    let route_namespace = route.source.namespace().unwrap_or_default();
    let source_rules = route.source.spec.rules.clone().unwrap_or_default();

    for (idx, source_rule) in source_rules.iter().enumerate() {
        if !route.rules[idx].valid_matches || !route.rules[idx].valid_filters {
            continue;
        }

        // Zero backendRefs is legal; a rule may consist of a redirect alone.
        let Some(source_refs) = &source_rule.backend_refs else {
            continue;
        };
        if source_refs.is_empty() {
            continue;
        }

        let mut backend_refs = Vec::with_capacity(source_refs.len());
        for (ref_idx, source_ref) in source_refs.iter().enumerate() {
            let path = format!("spec.rules[{idx}].backendRefs[{ref_idx}]");
            let (backend_ref, cond) = create_backend_ref(
                source_ref,
                &route_namespace,
                ref_grant_resolver,
                services,
                &path,
                policies,
            );
            backend_refs.push(backend_ref);
            if let Some(cond) = cond {
                route.conditions.push(cond);
            }
        }

        if backend_refs.len() > 1 {
            if let Some(cond) = validate_matching_backend_tls_policies(&backend_refs, policies) {
                route.conditions.push(cond);
                for backend_ref in &mut backend_refs {
                    backend_ref.valid = false;
                }
            }
        }

        route.rules[idx].backend_refs = backend_refs;
    }
}

fn create_backend_ref(
    source_ref: &gw::HTTPBackendRef,
    route_namespace: &str,
    ref_grant_resolver: &ReferenceGrantResolver,
    services: &HashMap<ResourceId, Service>,
    path: &str,
    policies: &mut HashMap<ResourceId, BackendTlsPolicy>,
) -> (BackendRef, Option<Condition>) {
    // The weight is always computed: even an invalid ref is kept in its
    // group so the dataplane can answer with an error for it.
    let weight = match source_ref.weight {
        None => 1,
        Some(weight) if validate_weight(weight).is_ok() => weight,
        // The weight condition is reported by the ref validation below.
        Some(_) => 0,
    };

    let svc_id = backend_service_id(source_ref, route_namespace);

    if let Err(cond) = validate_backend_ref(source_ref, route_namespace, ref_grant_resolver, path) {
        return (
            BackendRef {
                svc_id,
                weight,
                ..Default::default()
            },
            Some(cond),
        );
    }

    let svc_id = svc_id.expect("validated refs name a Service");

    let service_port = match find_service_port(services, &svc_id, source_ref.port) {
        Ok(port) => port,
        Err(msg) => {
            return (
                BackendRef {
                    svc_id: Some(svc_id),
                    weight,
                    ..Default::default()
                },
                Some(conditions::new_route_backend_ref_ref_backend_not_found(msg)),
            );
        }
    };

    match find_backend_tls_policy(policies, &svc_id) {
        Ok(policy) => (
            BackendRef {
                svc_id: Some(svc_id),
                service_port,
                weight,
                valid: true,
                backend_tls_policy: policy,
            },
            None,
        ),
        Err(msg) => (
            BackendRef {
                svc_id: Some(svc_id),
                service_port,
                weight,
                ..Default::default()
            },
            Some(conditions::new_route_backend_ref_unsupported_value(msg)),
        ),
    }
}

fn backend_service_id(source_ref: &gw::HTTPBackendRef, route_namespace: &str) -> Option<ResourceId> {
    if !is_core_group(&source_ref.group)
        || source_ref.kind.as_deref().is_some_and(|kind| kind != "Service")
    {
        return None;
    }
    let namespace = source_ref
        .namespace
        .clone()
        .unwrap_or_else(|| route_namespace.to_string());
    Some(ResourceId::new(namespace, source_ref.name.clone()))
}

fn validate_backend_ref(
    source_ref: &gw::HTTPBackendRef,
    route_namespace: &str,
    ref_grant_resolver: &ReferenceGrantResolver,
    path: &str,
) -> Result<(), Condition> {
    // All failures produce the same condition type with different reasons,
    // so the first error wins.

    if source_ref.filters.as_ref().is_some_and(|f| !f.is_empty()) {
        return Err(conditions::new_route_backend_ref_unsupported_value(format!(
            "{path}.filters: Too many: must have at most 0 items",
        )));
    }

    if !is_core_group(&source_ref.group) {
        return Err(conditions::new_route_backend_ref_invalid_kind(format!(
            "{path}.group: Unsupported value: {:?}: supported values: \"core\", \"\"",
            source_ref.group.as_deref().unwrap_or(""),
        )));
    }

    if source_ref.kind.as_deref().is_some_and(|kind| kind != "Service") {
        return Err(conditions::new_route_backend_ref_invalid_kind(format!(
            "{path}.kind: Unsupported value: {:?}: supported values: \"Service\"",
            source_ref.kind.as_deref().unwrap_or(""),
        )));
    }

    if let Some(namespace) = source_ref.namespace.as_deref() {
        if namespace != route_namespace {
            let svc_id = ResourceId::new(namespace, source_ref.name.clone());
            if !ref_grant_resolver.ref_allowed(
                &to_service(svc_id.clone()),
                &from_http_route(route_namespace.to_string()),
            ) {
                return Err(conditions::new_route_backend_ref_ref_not_permitted(format!(
                    "Backend ref to Service {svc_id} not permitted by any ReferenceGrant",
                )));
            }
        }
    }

    if source_ref.port.is_none() {
        return Err(conditions::new_route_backend_ref_unsupported_value(format!(
            "{path}.port: Required value: port cannot be nil",
        )));
    }

    if let Some(weight) = source_ref.weight {
        if let Err(err) = validate_weight(weight) {
            return Err(conditions::new_route_backend_ref_unsupported_value(format!(
                "{path}.weight: Invalid value: {weight}: {err}",
            )));
        }
    }

    Ok(())
}

fn validate_weight(weight: i32) -> Result<(), String> {
    if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&weight) {
        return Err(format!("must be in the range [{MIN_WEIGHT}, {MAX_WEIGHT}]"));
    }
    Ok(())
}

fn find_service_port(
    services: &HashMap<ResourceId, Service>,
    svc_id: &ResourceId,
    port: Option<i32>,
) -> Result<ServicePort, String> {
    let port = port.expect("validated refs carry a port");

    let service = services
        .get(svc_id)
        .ok_or_else(|| format!("service {svc_id} does not exist"))?;

    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| p.port == port))
        .cloned()
        .ok_or_else(|| format!("no matching port for Service {svc_id} and port {port}"))
}

/// Finds the BackendTLSPolicy targeting the Service, preferring the oldest
/// when several do. Referencing a policy marks it referenced; referencing an
/// invalid policy invalidates the backend.
fn find_backend_tls_policy(
    policies: &mut HashMap<ResourceId, BackendTlsPolicy>,
    svc_id: &ResourceId,
) -> Result<Option<ResourceId>, String> {
    let mut selected: Option<ResourceId> = None;

    for (id, policy) in policies.iter() {
        if policy.target_service() != *svc_id {
            continue;
        }
        match &selected {
            None => selected = Some(id.clone()),
            Some(current) => {
                if sort::less_object_meta(
                    &policy.source.metadata,
                    &policies[current].source.metadata,
                ) {
                    selected = Some(id.clone());
                }
            }
        }
    }

    let Some(id) = selected else {
        return Ok(None);
    };

    let policy = policies.get_mut(&id).expect("selected policy exists");
    policy.is_referenced = true;

    if !policy.valid {
        let detail = policy
            .conditions
            .first()
            .map(|c| c.message.clone())
            .unwrap_or_default();
        return Err(format!("the backend TLS policy is invalid: {detail}"));
    }

    policy
        .conditions
        .push(conditions::new_backend_tls_policy_accepted());
    Ok(Some(id))
}

/// All backends of a rule must agree on their BackendTLSPolicy
/// configuration: same caCertRefs or same wellKnownCACerts, same hostname.
/// On mismatch the whole rule is invalidated.
fn validate_matching_backend_tls_policies(
    backend_refs: &[BackendRef],
    policies: &HashMap<ResourceId, BackendTlsPolicy>,
) -> Option<Condition> {
    let mut reference: Option<&BackendTlsPolicy> = None;
    let mut mismatch = false;

    for backend_ref in backend_refs {
        let policy = backend_ref
            .backend_tls_policy
            .as_ref()
            .and_then(|id| policies.get(id));

        match (policy, reference) {
            (None, None) => {}
            (None, Some(_)) => {
                mismatch = true;
                break;
            }
            (Some(policy), None) => reference = Some(policy),
            (Some(policy), Some(reference_policy)) => {
                let a = &policy.source.spec.tls;
                let b = &reference_policy.source.spec.tls;
                if a.ca_cert_refs != b.ca_cert_refs
                    || a.well_known_ca_certs != b.well_known_ca_certs
                    || a.hostname != b.hostname
                {
                    mismatch = true;
                    break;
                }
            }
        }
    }

    mismatch.then(|| {
        conditions::new_route_backend_ref_unsupported_value(
            "Backend TLS policies do not match for all backends",
        )
    })
}
