use super::{
    gatewayclass::GatewayClass,
    hostnames::validate_hostname,
    resolvers::{from_gateway, to_secret, ReferenceGrantResolver, SecretResolver},
};
use crate::{
    conditions::{self, Condition},
    sort, ProtectedPorts,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway::{self as gw, from_namespaces, is_core_group, protocol},
    labels::Selector,
    ResourceExt,
};

/// The winning Gateway with its validated listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct Gateway {
    pub source: gw::Gateway,
    pub listeners: Vec<Listener>,
    pub conditions: Vec<Condition>,
    pub valid: bool,
}

impl Gateway {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.source.namespace().unwrap_or_default(), self.source.name_unchecked())
    }
}

/// One validated listener of the winning Gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub name: String,
    pub source: gw::Listener,
    /// Keys of the routes attached to this listener.
    pub routes: HashSet<ResourceId>,
    pub conditions: Vec<Condition>,
    /// Kinds of routes the listener supports, reported on its status.
    pub supported_kinds: Vec<gw::RouteGroupKind>,
    /// All validation passed; the listener may be programmed.
    pub valid: bool,
    /// Routes may bind even when the listener is not valid, for example when
    /// its certificate reference is not (yet) permitted.
    pub attachable: bool,
    /// Compiled `allowedRoutes.namespaces.selector`, when `from: Selector`.
    pub allowed_route_label_selector: Option<Selector>,
    /// The TLS secret, once resolved and permitted.
    pub resolved_secret: Option<ResourceId>,
}

pub(crate) struct ProcessedGateways {
    pub winner: Option<gw::Gateway>,
    pub ignored: HashMap<ResourceId, gw::Gateway>,
}

impl ProcessedGateways {
    /// Keys of every Gateway of this class, the winner included.
    pub fn all_ids(&self) -> HashSet<ResourceId> {
        let mut ids: HashSet<ResourceId> = self.ignored.keys().cloned().collect();
        if let Some(winner) = &self.winner {
            ids.insert(ResourceId::new(
                winner.namespace().unwrap_or_default(),
                winner.name_unchecked(),
            ));
        }
        ids
    }
}

/// Selects the winning Gateway among those referencing the class: the oldest
/// by creation timestamp, ties broken lexicographically on namespace/name.
/// When `restrict` names one Gateway, only that Gateway is considered.
pub(crate) fn process_gateways(
    gateways: &HashMap<ResourceId, gw::Gateway>,
    gc_name: &str,
    restrict: Option<&ResourceId>,
) -> ProcessedGateways {
    let mut processed = ProcessedGateways {
        winner: None,
        ignored: HashMap::new(),
    };

    for (id, gateway) in gateways {
        if gateway.spec.gateway_class_name != gc_name {
            continue;
        }
        if let Some(restrict) = restrict {
            if id == restrict {
                processed.winner = Some(gateway.clone());
            }
            continue;
        }

        match processed.winner.take() {
            None => processed.winner = Some(gateway.clone()),
            Some(current) => {
                if sort::less_object_meta(&gateway.metadata, &current.metadata) {
                    processed.ignored.insert(
                        ResourceId::new(
                            current.namespace().unwrap_or_default(),
                            current.name_unchecked(),
                        ),
                        current,
                    );
                    processed.winner = Some(gateway.clone());
                } else {
                    processed.ignored.insert(id.clone(), gateway.clone());
                    processed.winner = Some(current);
                }
            }
        }
    }

    processed
}

pub(crate) fn build_gateway(
    gateway: Option<gw::Gateway>,
    secret_resolver: &mut SecretResolver<'_>,
    gateway_class: Option<&GatewayClass>,
    ref_grant_resolver: &ReferenceGrantResolver,
    protected_ports: &ProtectedPorts,
) -> Option<Gateway> {
    let gateway = gateway?;

    let (conditions, valid) = validate_gateway(&gateway, gateway_class);
    if !valid {
        return Some(Gateway {
            source: gateway,
            listeners: Vec::new(),
            conditions,
            valid: false,
        });
    }

    let listeners = build_listeners(&gateway, secret_resolver, ref_grant_resolver, protected_ports);

    Some(Gateway {
        source: gateway,
        listeners,
        conditions,
        valid: true,
    })
}

fn validate_gateway(
    gateway: &gw::Gateway,
    gateway_class: Option<&GatewayClass>,
) -> (Vec<Condition>, bool) {
    match gateway_class {
        None => (
            conditions::new_gateway_invalid("GatewayClass doesn't exist"),
            false,
        ),
        Some(gc) if !gc.valid => (
            conditions::new_gateway_invalid("GatewayClass is invalid"),
            false,
        ),
        Some(_) => {
            if gateway
                .spec
                .addresses
                .as_ref()
                .is_some_and(|addresses| !addresses.is_empty())
            {
                (
                    conditions::new_gateway_unsupported_value(
                        "spec.addresses: Forbidden: addresses are not supported",
                    ),
                    false,
                )
            } else {
                (Vec::new(), true)
            }
        }
    }
}

fn build_listeners(
    gateway: &gw::Gateway,
    secret_resolver: &mut SecretResolver<'_>,
    ref_grant_resolver: &ReferenceGrantResolver,
    protected_ports: &ProtectedPorts,
) -> Vec<Listener> {
    let gateway_namespace = gateway.namespace().unwrap_or_default();

    let mut listeners: Vec<Listener> = gateway
        .spec
        .listeners
        .iter()
        .map(|l| {
            build_listener(
                l,
                &gateway_namespace,
                secret_resolver,
                ref_grant_resolver,
                protected_ports,
            )
        })
        .collect();

    mark_protocol_conflicts(&mut listeners);

    listeners
}

/// Listeners on one port must agree on the protocol. Conflicting listeners
/// are all invalidated.
fn mark_protocol_conflicts(listeners: &mut [Listener]) {
    let mut protocols_by_port: HashMap<i32, HashSet<String>> = HashMap::new();
    for l in listeners.iter() {
        protocols_by_port
            .entry(l.source.port)
            .or_default()
            .insert(l.source.protocol.clone());
    }

    for l in listeners.iter_mut() {
        if protocols_by_port[&l.source.port].len() > 1 {
            l.conditions.extend(conditions::new_listener_protocol_conflict(&format!(
                "protocol: Invalid value: {}: multiple listeners on port {} with conflicting \
                 protocols",
                l.source.protocol, l.source.port,
            )));
            l.valid = false;
        }
    }
}

fn build_listener(
    listener: &gw::Listener,
    gateway_namespace: &str,
    secret_resolver: &mut SecretResolver<'_>,
    ref_grant_resolver: &ReferenceGrantResolver,
    protected_ports: &ProtectedPorts,
) -> Listener {
    let mut conds = Vec::new();
    let mut attachable = true;
    let mut resolved_secret = None;

    let validator = ListenerValidator::for_protocol(&listener.protocol);
    match &validator {
        None => {
            conds.extend(conditions::new_listener_unsupported_protocol(&format!(
                "protocol: Unsupported value: {:?}: supported values: \"HTTP\", \"HTTPS\"",
                listener.protocol,
            )));
            attachable = false;
        }
        Some(validator) => {
            conds.extend(validator.validate(listener, protected_ports));
        }
    }

    if let Some(hostname) = listener.hostname.as_deref() {
        // An empty hostname means "any" and is equivalent to leaving it out.
        if !hostname.is_empty() {
            if let Err(err) = validate_hostname(hostname) {
                conds.extend(conditions::new_listener_unsupported_value(&format!(
                    "hostname: Invalid value: {hostname:?}: {err}",
                )));
            }
        }
    }

    let (selector, selector_conds) = validate_allowed_route_namespaces(listener);
    if !selector_conds.is_empty() {
        conds.extend(selector_conds);
        attachable = false;
    }

    let (supported_kinds, kind_conds) = build_supported_kinds(listener);
    conds.extend(kind_conds);

    if matches!(&validator, Some(ListenerValidator::Https)) && conds.is_empty() {
        match resolve_certificate_ref(
            listener,
            gateway_namespace,
            secret_resolver,
            ref_grant_resolver,
        ) {
            Ok(secret) => resolved_secret = Some(secret),
            Err(cert_conds) => conds.extend(cert_conds),
        }
    }

    Listener {
        name: listener.name.clone(),
        source: listener.clone(),
        routes: HashSet::new(),
        valid: conds.is_empty(),
        attachable,
        conditions: conds,
        supported_kinds,
        allowed_route_label_selector: selector,
        resolved_secret,
    }
}

/// Validators for the closed set of supported listener protocols.
enum ListenerValidator {
    Http,
    Https,
}

impl ListenerValidator {
    fn for_protocol(protocol: &str) -> Option<Self> {
        match protocol {
            protocol::HTTP => Some(Self::Http),
            protocol::HTTPS => Some(Self::Https),
            _ => None,
        }
    }

    fn validate(&self, listener: &gw::Listener, protected_ports: &ProtectedPorts) -> Vec<Condition> {
        let mut conds = Vec::new();

        if let Err(err) = validate_listener_port(listener.port, protected_ports) {
            conds.extend(conditions::new_listener_unsupported_value(&format!(
                "port: Invalid value: {}: {err}",
                listener.port,
            )));
        }

        match self {
            Self::Http => {
                if listener.tls.is_some() {
                    conds.extend(conditions::new_listener_unsupported_value(
                        "tls: Forbidden: tls is not supported for HTTP listener",
                    ));
                }
            }
            Self::Https => conds.extend(validate_listener_tls(listener.tls.as_ref())),
        }

        conds
    }
}

fn validate_listener_port(port: i32, protected_ports: &ProtectedPorts) -> Result<(), String> {
    if !(1..=65535).contains(&port) {
        return Err("port must be between 1-65535".to_string());
    }
    if let Some(purpose) = protected_ports.get(&port) {
        return Err(format!("port is already in use as {purpose}"));
    }
    Ok(())
}

fn validate_listener_tls(tls: Option<&gw::GatewayTlsConfig>) -> Vec<Condition> {
    let Some(tls) = tls else {
        return conditions::new_listener_unsupported_value(
            "tls: Required value: tls must be defined for HTTPS listener",
        );
    };

    let mut conds = Vec::new();

    if tls.mode.as_deref() != Some(gw::TLS_MODE_TERMINATE) {
        conds.extend(conditions::new_listener_unsupported_value(&format!(
            "tls.mode: Unsupported value: {:?}: supported values: \"Terminate\"",
            tls.mode.as_deref().unwrap_or(""),
        )));
    }

    if tls.options.as_ref().is_some_and(|o| !o.is_empty()) {
        conds.extend(conditions::new_listener_unsupported_value(
            "tls.options: Forbidden: options are not supported",
        ));
    }

    let cert_ref_count = tls.certificate_refs.as_ref().map_or(0, |refs| refs.len());
    if cert_ref_count != 1 {
        conds.extend(conditions::new_listener_unsupported_value(&format!(
            "tls.certificateRefs: Invalid value: {cert_ref_count} certificateRefs: exactly one \
             certificateRef must be provided",
        )));
        return conds;
    }

    let cert_ref = &tls.certificate_refs.as_ref().expect("one certificateRef")[0];
    if !is_core_group(&cert_ref.group) {
        conds.extend(conditions::new_listener_invalid_certificate_ref(&format!(
            "tls.certificateRefs[0].group: Unsupported value: {:?}: supported values: \"\", \
             \"core\"",
            cert_ref.group.as_deref().unwrap_or(""),
        )));
    }
    if cert_ref.kind.as_deref().is_some_and(|kind| kind != "Secret") {
        conds.extend(conditions::new_listener_invalid_certificate_ref(&format!(
            "tls.certificateRefs[0].kind: Unsupported value: {:?}: supported values: \"Secret\"",
            cert_ref.kind.as_deref().unwrap_or(""),
        )));
    }

    conds
}

fn validate_allowed_route_namespaces(
    listener: &gw::Listener,
) -> (Option<Selector>, Vec<Condition>) {
    let namespaces = listener
        .allowed_routes
        .as_ref()
        .and_then(|ar| ar.namespaces.as_ref());
    let Some(namespaces) = namespaces else {
        return (None, Vec::new());
    };

    if namespaces.from.as_deref() != Some(from_namespaces::SELECTOR) {
        return (None, Vec::new());
    }

    match &namespaces.selector {
        None => (
            None,
            conditions::new_listener_unsupported_value(
                "allowedRoutes.namespaces.selector: Required value: selector must be set when \
                 from is Selector",
            ),
        ),
        Some(selector) => match Selector::from_label_selector(selector) {
            Ok(selector) => (Some(selector), Vec::new()),
            Err(err) => (
                None,
                conditions::new_listener_unsupported_value(&format!(
                    "allowedRoutes.namespaces.selector: Invalid value: {err}",
                )),
            ),
        },
    }
}

/// Computes the kinds the listener supports: the intersection of the kinds
/// appropriate for the protocol and the listener's `allowedRoutes.kinds`.
fn build_supported_kinds(listener: &gw::Listener) -> (Vec<gw::RouteGroupKind>, Vec<Condition>) {
    let default_kinds = vec![gw::RouteGroupKind::http_route()];

    let Some(kinds) = listener.allowed_routes.as_ref().and_then(|ar| ar.kinds.as_ref()) else {
        return (default_kinds, Vec::new());
    };
    if kinds.is_empty() {
        return (default_kinds, Vec::new());
    }

    let mut supported = Vec::new();
    let mut invalid = Vec::new();
    for kind in kinds {
        let group_ok = match kind.group.as_deref() {
            None | Some(gw::GROUP_NAME) => true,
            Some(_) => false,
        };
        if group_ok && kind.kind == "HTTPRoute" {
            if !supported.contains(&gw::RouteGroupKind::http_route()) {
                supported.push(gw::RouteGroupKind::http_route());
            }
        } else {
            invalid.push(format!(
                "{}/{}",
                kind.group.as_deref().unwrap_or(""),
                kind.kind
            ));
        }
    }

    let conds = if invalid.is_empty() {
        Vec::new()
    } else {
        conditions::new_listener_invalid_route_kinds(&format!(
            "allowedRoutes.kinds: Unsupported kinds: {}",
            invalid.join(", "),
        ))
    };

    (supported, conds)
}

fn resolve_certificate_ref(
    listener: &gw::Listener,
    gateway_namespace: &str,
    secret_resolver: &mut SecretResolver<'_>,
    ref_grant_resolver: &ReferenceGrantResolver,
) -> Result<ResourceId, Vec<Condition>> {
    let cert_ref = &listener
        .tls
        .as_ref()
        .and_then(|tls| tls.certificate_refs.as_ref())
        .expect("validated certificateRefs")[0];

    let secret_namespace = cert_ref
        .namespace
        .clone()
        .unwrap_or_else(|| gateway_namespace.to_string());
    let secret_id = ResourceId::new(secret_namespace.clone(), cert_ref.name.clone());

    // Resolve before the permission check so the secret lands in the
    // referenced set either way; a later grant creation must trigger a
    // rebuild.
    let resolution = secret_resolver.resolve(&secret_id);

    if secret_namespace != gateway_namespace
        && !ref_grant_resolver.ref_allowed(
            &to_secret(secret_id.clone()),
            &from_gateway(gateway_namespace.to_string()),
        )
    {
        return Err(conditions::new_listener_ref_not_permitted(&format!(
            "Certificate ref to secret {secret_id} not permitted by any ReferenceGrant",
        )));
    }

    match resolution {
        Ok(()) => Ok(secret_id),
        Err(err) => Err(conditions::new_listener_invalid_certificate_ref(&format!(
            "tls.certificateRefs[0]: Invalid value: {secret_id}: {err}",
        ))),
    }
}
