use super::{
    backend_refs::BackendRef,
    gateways::{Gateway, Listener},
    hostnames::{find_accepted_hostnames, validate_hostname},
};
use crate::conditions::{self, Condition};
use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway::{self as gw, filter_type, from_namespaces, path_match_type, path_modifier_type},
    Namespace, ResourceExt,
};
use std::collections::BTreeMap;

/// An HTTPRoute with at least one parentRef naming a Gateway of this class.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub source: gw::HTTPRoute,
    /// The parentRefs pointing at Gateways of this class, each with its
    /// attachment outcome.
    pub parent_refs: Vec<ParentRef>,
    /// Validation outcomes per rule, index-aligned with the source rules.
    pub rules: Vec<Rule>,
    pub conditions: Vec<Condition>,
    /// The spec is usable; invalid routes produce no configuration.
    pub valid: bool,
    /// At least one parentRef attached to a listener.
    pub attachable: bool,
}

impl Route {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(
            self.source.namespace().unwrap_or_default(),
            self.source.name_unchecked(),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParentRef {
    /// Index of this ref in the source `spec.parentRefs`.
    pub idx: usize,
    /// The referenced Gateway.
    pub gateway: ResourceId,
    pub section_name: Option<String>,
    /// Set during binding; `None` until then (and for invalid routes).
    pub attachment: Option<ParentRefAttachmentStatus>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParentRefAttachmentStatus {
    pub attached: bool,
    /// Hostnames bound per listener name; non-empty exactly when the
    /// listener accepted the route.
    pub accepted_hostnames: BTreeMap<String, Vec<String>>,
    /// Why no listener accepted the route, when none did.
    pub failed_condition: Option<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rule {
    pub valid_matches: bool,
    pub valid_filters: bool,
    /// Populated by the backend-ref stage.
    pub backend_refs: Vec<BackendRef>,
}

/// Builds a [`Route`] for every HTTPRoute with a parentRef naming one of the
/// given Gateways. Other routes are not ours to report on.
pub(crate) fn build_routes_for_gateways(
    http_routes: &HashMap<ResourceId, gw::HTTPRoute>,
    gateway_ids: &ahash::AHashSet<ResourceId>,
) -> HashMap<ResourceId, Route> {
    let mut routes = HashMap::new();

    for (id, http_route) in http_routes {
        let parent_refs = build_parent_refs(http_route, gateway_ids);
        if parent_refs.is_empty() {
            continue;
        }
        routes.insert(id.clone(), build_route(http_route.clone(), parent_refs));
    }

    routes
}

fn build_parent_refs(
    route: &gw::HTTPRoute,
    gateway_ids: &ahash::AHashSet<ResourceId>,
) -> Vec<ParentRef> {
    let route_namespace = route.namespace().unwrap_or_default();

    route
        .spec
        .parent_refs
        .iter()
        .flatten()
        .enumerate()
        .filter(|(_, parent_ref)| {
            gw::is_gateway_group(&parent_ref.group)
                && parent_ref.kind.as_deref().map_or(true, |kind| kind == "Gateway")
        })
        .filter_map(|(idx, parent_ref)| {
            let gateway = ResourceId::new(
                parent_ref
                    .namespace
                    .clone()
                    .unwrap_or_else(|| route_namespace.clone()),
                parent_ref.name.clone(),
            );
            gateway_ids.contains(&gateway).then(|| ParentRef {
                idx,
                gateway,
                section_name: parent_ref.section_name.clone(),
                attachment: None,
            })
        })
        .collect()
}

pub(crate) fn build_route(source: gw::HTTPRoute, parent_refs: Vec<ParentRef>) -> Route {
    let mut conds = Vec::new();
    let mut valid = true;

    for hostname in source.spec.hostnames.iter().flatten() {
        if let Err(err) = validate_hostname(hostname) {
            conds.push(conditions::new_route_unsupported_value(format!(
                "spec.hostnames: Invalid value: {hostname:?}: {err}",
            )));
            valid = false;
            break;
        }
    }

    let source_rules = source.spec.rules.clone().unwrap_or_default();
    let mut rules = Vec::with_capacity(source_rules.len());
    let mut rule_errors = Vec::new();
    let mut valid_rule_count = 0;

    for (idx, rule) in source_rules.iter().enumerate() {
        let match_errors = validate_matches(rule, idx);
        let filter_errors = validate_filters(rule, idx);

        let rule = Rule {
            valid_matches: match_errors.is_empty(),
            valid_filters: filter_errors.is_empty(),
            backend_refs: Vec::new(),
        };
        if rule.valid_matches && rule.valid_filters {
            valid_rule_count += 1;
        }
        rules.push(rule);
        rule_errors.extend(match_errors);
        rule_errors.extend(filter_errors);
    }

    if !rule_errors.is_empty() {
        let msg = rule_errors.join("; ");
        if valid_rule_count == 0 {
            conds.push(conditions::new_route_unsupported_value(msg));
            valid = false;
        } else {
            conds.push(conditions::new_route_partially_invalid(msg));
        }
    }

    Route {
        source,
        parent_refs,
        rules,
        conditions: conds,
        valid,
        attachable: false,
    }
}

fn validate_matches(rule: &gw::HTTPRouteRule, rule_idx: usize) -> Vec<String> {
    let mut errors = Vec::new();

    for (idx, match_) in rule.matches.iter().flatten().enumerate() {
        let path = format!("spec.rules[{rule_idx}].matches[{idx}]");

        if let Some(path_match) = &match_.path {
            match path_match.type_.as_deref() {
                None | Some(path_match_type::EXACT) | Some(path_match_type::PATH_PREFIX) => {}
                Some(other) => errors.push(format!(
                    "{path}.path.type: Unsupported value: {other:?}: supported values: \
                     \"Exact\", \"PathPrefix\"",
                )),
            }
            match path_match.value.as_deref() {
                None => errors.push(format!("{path}.path.value: Required value")),
                Some(value) if !value.starts_with('/') => errors.push(format!(
                    "{path}.path.value: Invalid value: {value:?}: path must start with /",
                )),
                Some(_) => {}
            }
        }

        for (hidx, header) in match_.headers.iter().flatten().enumerate() {
            if let Some(type_) = header.type_.as_deref() {
                if type_ != "Exact" {
                    errors.push(format!(
                        "{path}.headers[{hidx}].type: Unsupported value: {type_:?}: supported \
                         values: \"Exact\"",
                    ));
                }
            }
            if header.name.is_empty() {
                errors.push(format!("{path}.headers[{hidx}].name: Required value"));
            }
        }

        for (qidx, query) in match_.query_params.iter().flatten().enumerate() {
            if let Some(type_) = query.type_.as_deref() {
                if type_ != "Exact" {
                    errors.push(format!(
                        "{path}.queryParams[{qidx}].type: Unsupported value: {type_:?}: \
                         supported values: \"Exact\"",
                    ));
                }
            }
            if query.name.is_empty() {
                errors.push(format!("{path}.queryParams[{qidx}].name: Required value"));
            }
        }

        if let Some(method) = match_.method.as_deref() {
            const METHODS: [&str; 9] = [
                "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
            ];
            if !METHODS.contains(&method) {
                errors.push(format!(
                    "{path}.method: Unsupported value: {method:?}: must be a standard HTTP method",
                ));
            }
        }
    }

    errors
}

fn validate_filters(rule: &gw::HTTPRouteRule, rule_idx: usize) -> Vec<String> {
    let mut errors = Vec::new();

    for (idx, filter) in rule.filters.iter().flatten().enumerate() {
        let path = format!("spec.rules[{rule_idx}].filters[{idx}]");

        match filter.type_.as_str() {
            filter_type::REQUEST_REDIRECT => match &filter.request_redirect {
                None => errors.push(format!("{path}.requestRedirect: Required value")),
                Some(redirect) => errors.extend(validate_redirect(redirect, &path)),
            },
            filter_type::URL_REWRITE => match &filter.url_rewrite {
                None => errors.push(format!("{path}.urlRewrite: Required value")),
                Some(rewrite) => errors.extend(validate_rewrite(rewrite, &path)),
            },
            filter_type::REQUEST_HEADER_MODIFIER => match &filter.request_header_modifier {
                None => errors.push(format!("{path}.requestHeaderModifier: Required value")),
                Some(modifier) => errors.extend(validate_header_modifier(modifier, &path)),
            },
            other => errors.push(format!(
                "{path}.type: Unsupported value: {other:?}: supported values: \
                 \"RequestRedirect\", \"URLRewrite\", \"RequestHeaderModifier\"",
            )),
        }
    }

    errors
}

fn validate_redirect(redirect: &gw::HTTPRequestRedirectFilter, path: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(scheme) = redirect.scheme.as_deref() {
        if scheme != "http" && scheme != "https" {
            errors.push(format!(
                "{path}.requestRedirect.scheme: Unsupported value: {scheme:?}: supported \
                 values: \"http\", \"https\"",
            ));
        }
    }
    if let Some(hostname) = redirect.hostname.as_deref() {
        if let Err(err) = validate_hostname(hostname) {
            errors.push(format!(
                "{path}.requestRedirect.hostname: Invalid value: {hostname:?}: {err}",
            ));
        }
    }
    if let Some(status_code) = redirect.status_code {
        if status_code != 301 && status_code != 302 {
            errors.push(format!(
                "{path}.requestRedirect.statusCode: Unsupported value: {status_code}: \
                 supported values: 301, 302",
            ));
        }
    }
    if redirect.path.is_some() {
        errors.push(format!(
            "{path}.requestRedirect.path: Forbidden: path is not supported",
        ));
    }

    errors
}

fn validate_rewrite(rewrite: &gw::HTTPURLRewriteFilter, path: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(hostname) = rewrite.hostname.as_deref() {
        if let Err(err) = validate_hostname(hostname) {
            errors.push(format!(
                "{path}.urlRewrite.hostname: Invalid value: {hostname:?}: {err}",
            ));
        }
    }
    if let Some(modifier) = &rewrite.path {
        let value = match modifier.type_.as_str() {
            path_modifier_type::REPLACE_PREFIX_MATCH => &modifier.replace_prefix_match,
            path_modifier_type::REPLACE_FULL_PATH => &modifier.replace_full_path,
            other => {
                errors.push(format!(
                    "{path}.urlRewrite.path.type: Unsupported value: {other:?}: supported \
                     values: \"ReplacePrefixMatch\", \"ReplaceFullPath\"",
                ));
                return errors;
            }
        };
        match value.as_deref() {
            None => errors.push(format!("{path}.urlRewrite.path: Required value")),
            Some(value) if !value.starts_with('/') => errors.push(format!(
                "{path}.urlRewrite.path: Invalid value: {value:?}: path must start with /",
            )),
            Some(_) => {}
        }
    }

    errors
}

fn validate_header_modifier(modifier: &gw::HTTPHeaderFilter, path: &str) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = std::collections::BTreeSet::new();
    let mut check_name = |name: &str, field: String, errors: &mut Vec<String>| {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_".contains(c))
        {
            errors.push(format!("{field}: Invalid value: {name:?}: invalid header name"));
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            errors.push(format!("{field}: Duplicate value: {name:?}"));
        }
    };

    for (idx, header) in modifier.set.iter().flatten().enumerate() {
        check_name(
            &header.name,
            format!("{path}.requestHeaderModifier.set[{idx}].name"),
            &mut errors,
        );
    }
    for (idx, header) in modifier.add.iter().flatten().enumerate() {
        check_name(
            &header.name,
            format!("{path}.requestHeaderModifier.add[{idx}].name"),
            &mut errors,
        );
    }
    for (idx, name) in modifier.remove.iter().flatten().enumerate() {
        check_name(
            name,
            format!("{path}.requestHeaderModifier.remove[{idx}]"),
            &mut errors,
        );
    }

    errors
}

/// Binds every valid route to the listeners its parentRefs select,
/// populating accepted hostnames on the route side and attached-route sets
/// on the listener side.
pub(crate) fn bind_routes_to_listeners(
    routes: &mut HashMap<ResourceId, Route>,
    mut gateway: Option<&mut Gateway>,
    ignored_gateways: &HashMap<ResourceId, gw::Gateway>,
    namespaces: &HashMap<ResourceId, Namespace>,
) {
    for (route_id, route) in routes.iter_mut() {
        if !route.valid {
            continue;
        }

        let route_namespace = route.source.namespace().unwrap_or_default();
        let route_hostnames = route.source.spec.hostnames.clone().unwrap_or_default();

        let mut any_attached = false;
        for parent_ref in &mut route.parent_refs {
            let mut attachment = ParentRefAttachmentStatus::default();

            if ignored_gateways.contains_key(&parent_ref.gateway) {
                attachment.failed_condition = Some(conditions::new_todo("Gateway is ignored"));
                parent_ref.attachment = Some(attachment);
                continue;
            }

            match gateway.as_deref_mut() {
                Some(gateway) if gateway.id() == parent_ref.gateway => {
                    if !gateway.valid {
                        attachment.failed_condition =
                            Some(conditions::new_route_invalid_gateway());
                    } else {
                        bind_to_gateway(
                            route_id,
                            &route_namespace,
                            &route_hostnames,
                            parent_ref.section_name.as_deref(),
                            gateway,
                            namespaces,
                            &mut attachment,
                        );
                        any_attached |= attachment.attached;
                    }
                }
                // The ref passed the gateway-id filter, so a missing or
                // mismatched winner means the ref names an ignored gateway,
                // which was handled above.
                _ => {
                    attachment.failed_condition = Some(conditions::new_route_no_matching_parent());
                }
            }

            parent_ref.attachment = Some(attachment);
        }

        route.attachable = any_attached;
    }
}

enum BindFailure {
    NotAttachable,
    NotAllowed,
    NoMatchingHostname,
}

fn bind_to_gateway(
    route_id: &ResourceId,
    route_namespace: &str,
    route_hostnames: &[String],
    section_name: Option<&str>,
    gateway: &mut Gateway,
    namespaces: &HashMap<ResourceId, Namespace>,
    attachment: &mut ParentRefAttachmentStatus,
) {
    let gateway_namespace = gateway.source.namespace().unwrap_or_default();

    let mut candidates = 0;
    let mut saw_not_allowed = false;
    let mut saw_hostname_mismatch = false;

    for listener in &mut gateway.listeners {
        if section_name.is_some_and(|name| name != listener.name) {
            continue;
        }
        candidates += 1;

        match try_bind(
            route_namespace,
            route_hostnames,
            listener,
            &gateway_namespace,
            namespaces,
        ) {
            Ok(hostnames) => {
                attachment.attached = true;
                attachment
                    .accepted_hostnames
                    .insert(listener.name.clone(), hostnames);
                listener.routes.insert(route_id.clone());
            }
            Err(BindFailure::NotAllowed) => saw_not_allowed = true,
            Err(BindFailure::NoMatchingHostname) => saw_hostname_mismatch = true,
            Err(BindFailure::NotAttachable) => {}
        }
    }

    if attachment.attached {
        return;
    }

    attachment.failed_condition = Some(if candidates == 0 {
        conditions::new_route_no_matching_parent()
    } else if saw_hostname_mismatch {
        conditions::new_route_no_matching_listener_hostname()
    } else if saw_not_allowed {
        conditions::new_route_not_allowed_by_listeners()
    } else {
        conditions::new_route_invalid_listener()
    });
}

fn try_bind(
    route_namespace: &str,
    route_hostnames: &[String],
    listener: &Listener,
    gateway_namespace: &str,
    namespaces: &HashMap<ResourceId, Namespace>,
) -> Result<Vec<String>, BindFailure> {
    if !listener.attachable {
        return Err(BindFailure::NotAttachable);
    }

    if !listener
        .supported_kinds
        .iter()
        .any(|kind| kind.kind == "HTTPRoute")
    {
        return Err(BindFailure::NotAllowed);
    }

    if !route_namespace_allowed(route_namespace, listener, gateway_namespace, namespaces) {
        return Err(BindFailure::NotAllowed);
    }

    let accepted = find_accepted_hostnames(listener.source.hostname.as_deref(), route_hostnames);
    if accepted.is_empty() {
        return Err(BindFailure::NoMatchingHostname);
    }

    Ok(accepted)
}

fn route_namespace_allowed(
    route_namespace: &str,
    listener: &Listener,
    gateway_namespace: &str,
    namespaces: &HashMap<ResourceId, Namespace>,
) -> bool {
    let from = listener
        .source
        .allowed_routes
        .as_ref()
        .and_then(|ar| ar.namespaces.as_ref())
        .and_then(|ns| ns.from.as_deref())
        .unwrap_or(from_namespaces::SAME);

    match from {
        from_namespaces::ALL => true,
        from_namespaces::SAME => route_namespace == gateway_namespace,
        from_namespaces::SELECTOR => {
            let Some(selector) = &listener.allowed_route_label_selector else {
                return false;
            };
            namespaces
                .get(&ResourceId::cluster_scoped(route_namespace))
                .is_some_and(|ns| selector.matches(ns.labels()))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{
        self, gateway, http_listener, http_route, namespace_with_labels, route_rule_with_path,
    };
    use ahash::AHashSet as HashSet;

    fn gateway_ids(ids: &[(&str, &str)]) -> HashSet<ResourceId> {
        ids.iter().map(|(ns, name)| ResourceId::new(*ns, *name)).collect()
    }

    #[test]
    fn routes_without_a_matching_parent_ref_are_skipped() {
        let ids = gateway_ids(&[("test", "gateway-1")]);

        let ours = http_route("test", "hr-1", "gateway-1", &["foo.example.com"]);
        let foreign = http_route("test", "hr-2", "other-gateway", &["foo.example.com"]);

        let http_routes: HashMap<_, _> = [
            (ResourceId::new("test", "hr-1"), ours),
            (ResourceId::new("test", "hr-2"), foreign),
        ]
        .into_iter()
        .collect();

        let routes = build_routes_for_gateways(&http_routes, &ids);

        assert_eq!(routes.len(), 1);
        assert!(routes.contains_key(&ResourceId::new("test", "hr-1")));
    }

    #[test]
    fn invalid_hostnames_invalidate_the_route() {
        let route = http_route("test", "hr-1", "gateway-1", &["-bad-.example.com"]);
        let built = build_route(route, vec![]);

        assert!(!built.valid);
        assert_eq!(built.conditions.len(), 1);
        assert_eq!(built.conditions[0].reason, "UnsupportedValue");
    }

    #[test]
    fn partially_invalid_routes_keep_their_valid_rules() {
        let mut route = http_route("test", "hr-1", "gateway-1", &["foo.example.com"]);
        route.spec.rules = Some(vec![
            route_rule_with_path("/good"),
            route_rule_with_path("bad-no-slash"),
        ]);

        let built = build_route(route, vec![]);

        assert!(built.valid);
        assert_eq!(built.rules.len(), 2);
        assert!(built.rules[0].valid_matches);
        assert!(!built.rules[1].valid_matches);
        assert_eq!(built.conditions.len(), 1);
        assert_eq!(built.conditions[0].type_, "PartiallyInvalid");
        assert!(built.conditions[0].message.starts_with("Dropped Rule(s)"));
    }

    #[test]
    fn fully_invalid_rules_invalidate_the_route() {
        let mut route = http_route("test", "hr-1", "gateway-1", &["foo.example.com"]);
        route.spec.rules = Some(vec![route_rule_with_path("bad-no-slash")]);

        let built = build_route(route, vec![]);

        assert!(!built.valid);
        assert_eq!(built.conditions[0].reason, "UnsupportedValue");
    }

    #[test]
    fn unsupported_filters_invalidate_the_rule() {
        let mut rule = route_rule_with_path("/");
        rule.filters = Some(vec![gw::HTTPRouteFilter {
            type_: "ExtensionRef".to_string(),
            ..Default::default()
        }]);
        assert!(!validate_filters(&rule, 0).is_empty());

        let mut rule = route_rule_with_path("/");
        rule.filters = Some(vec![gw::HTTPRouteFilter {
            type_: filter_type::REQUEST_REDIRECT.to_string(),
            request_redirect: Some(gw::HTTPRequestRedirectFilter {
                scheme: Some("https".to_string()),
                status_code: Some(302),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        assert!(validate_filters(&rule, 0).is_empty());

        let mut rule = route_rule_with_path("/");
        rule.filters = Some(vec![gw::HTTPRouteFilter {
            type_: filter_type::REQUEST_REDIRECT.to_string(),
            request_redirect: Some(gw::HTTPRequestRedirectFilter {
                status_code: Some(307),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        assert!(!validate_filters(&rule, 0).is_empty());
    }

    #[test]
    fn binding_populates_both_sides() {
        let mut gw_node = test_util::built_gateway(
            "test",
            "gateway-1",
            vec![http_listener("listener-80-1", 80)],
        );

        let route_id = ResourceId::new("test", "hr-1");
        let mut routes: HashMap<_, _> = [(
            route_id.clone(),
            build_route(
                http_route("test", "hr-1", "gateway-1", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-1"),
                    section_name: None,
                    attachment: None,
                }],
            ),
        )]
        .into_iter()
        .collect();

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &HashMap::new(), &HashMap::new());

        let route = &routes[&route_id];
        assert!(route.attachable);
        let attachment = route.parent_refs[0].attachment.as_ref().unwrap();
        assert!(attachment.attached);
        assert_eq!(
            attachment.accepted_hostnames["listener-80-1"],
            vec!["foo.example.com"]
        );
        assert!(gw_node.listeners[0].routes.contains(&route_id));
    }

    #[test]
    fn section_name_restricts_the_candidate_listeners() {
        let mut gw_node = test_util::built_gateway(
            "test",
            "gateway-1",
            vec![
                http_listener("listener-80-1", 80),
                http_listener("listener-8080-1", 8080),
            ],
        );

        let route_id = ResourceId::new("test", "hr-1");
        let mut routes: HashMap<_, _> = [(
            route_id.clone(),
            build_route(
                http_route("test", "hr-1", "gateway-1", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-1"),
                    section_name: Some("listener-8080-1".to_string()),
                    attachment: None,
                }],
            ),
        )]
        .into_iter()
        .collect();

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &HashMap::new(), &HashMap::new());

        let attachment = routes[&route_id].parent_refs[0].attachment.as_ref().unwrap();
        assert_eq!(
            attachment.accepted_hostnames.keys().collect::<Vec<_>>(),
            vec!["listener-8080-1"]
        );
        assert!(gw_node.listeners[0].routes.is_empty());
        assert!(gw_node.listeners[1].routes.contains(&route_id));
    }

    #[test]
    fn a_missing_section_name_fails_with_no_matching_parent() {
        let mut gw_node = test_util::built_gateway(
            "test",
            "gateway-1",
            vec![http_listener("listener-80-1", 80)],
        );

        let route_id = ResourceId::new("test", "hr-1");
        let mut routes: HashMap<_, _> = [(
            route_id.clone(),
            build_route(
                http_route("test", "hr-1", "gateway-1", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-1"),
                    section_name: Some("no-such-listener".to_string()),
                    attachment: None,
                }],
            ),
        )]
        .into_iter()
        .collect();

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &HashMap::new(), &HashMap::new());

        let attachment = routes[&route_id].parent_refs[0].attachment.as_ref().unwrap();
        assert!(!attachment.attached);
        assert_eq!(
            attachment.failed_condition.as_ref().unwrap().reason,
            "NoMatchingParent"
        );
    }

    #[test]
    fn hostname_mismatches_fail_with_a_distinct_reason() {
        let mut listener = http_listener("listener-80-1", 80);
        listener.hostname = Some("cafe.example.com".to_string());
        let mut gw_node = test_util::built_gateway("test", "gateway-1", vec![listener]);

        let route_id = ResourceId::new("test", "hr-1");
        let mut routes: HashMap<_, _> = [(
            route_id.clone(),
            build_route(
                http_route("test", "hr-1", "gateway-1", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-1"),
                    section_name: None,
                    attachment: None,
                }],
            ),
        )]
        .into_iter()
        .collect();

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &HashMap::new(), &HashMap::new());

        let attachment = routes[&route_id].parent_refs[0].attachment.as_ref().unwrap();
        assert_eq!(
            attachment.failed_condition.as_ref().unwrap().reason,
            "NoMatchingListenerHostname"
        );
    }

    #[test]
    fn cross_namespace_routes_need_an_allowing_listener() {
        // Listener in ns "test" with the default Same policy.
        let mut gw_node = test_util::built_gateway(
            "test",
            "gateway-1",
            vec![http_listener("listener-80-1", 80)],
        );

        let route_id = ResourceId::new("other", "hr-1");
        let mut routes: HashMap<_, _> = [(
            route_id.clone(),
            build_route(
                http_route("other", "hr-1", "gateway-1", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-1"),
                    section_name: None,
                    attachment: None,
                }],
            ),
        )]
        .into_iter()
        .collect();

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &HashMap::new(), &HashMap::new());

        let attachment = routes[&route_id].parent_refs[0].attachment.as_ref().unwrap();
        assert_eq!(
            attachment.failed_condition.as_ref().unwrap().reason,
            "NotAllowedByListeners"
        );
    }

    #[test]
    fn selector_listeners_admit_matching_namespaces() {
        let mut listener = http_listener("listener-80-1", 80);
        listener.allowed_routes = Some(gw::AllowedRoutes {
            namespaces: Some(gw::RouteNamespaces {
                from: Some(from_namespaces::SELECTOR.to_string()),
                selector: Some(nginx_gateway_controller_k8s_api::LabelSelector {
                    match_labels: Some(
                        [("team".to_string(), "shop".to_string())].into_iter().collect(),
                    ),
                    match_expressions: None,
                }),
            }),
            kinds: None,
        });
        // Compile the selector the way the listener builder would.
        let mut gw_node = test_util::built_gateway("test", "gateway-1", vec![listener]);

        let namespaces: HashMap<_, _> = [
            namespace_with_labels("allowed", &[("team", "shop")]),
            namespace_with_labels("denied", &[("team", "search")]),
        ]
        .into_iter()
        .collect();

        let make_route = |ns: &str| {
            build_route(
                http_route(ns, "hr-1", "gateway-1", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-1"),
                    section_name: None,
                    attachment: None,
                }],
            )
        };

        let allowed_id = ResourceId::new("allowed", "hr-1");
        let denied_id = ResourceId::new("denied", "hr-1");
        let mut routes: HashMap<_, _> = [
            (allowed_id.clone(), make_route("allowed")),
            (denied_id.clone(), make_route("denied")),
        ]
        .into_iter()
        .collect();

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &HashMap::new(), &namespaces);

        assert!(routes[&allowed_id].parent_refs[0].attachment.as_ref().unwrap().attached);
        assert!(!routes[&denied_id].parent_refs[0].attachment.as_ref().unwrap().attached);
    }

    #[test]
    fn routes_parented_to_an_ignored_gateway_get_the_placeholder_condition() {
        let ignored: HashMap<_, _> = [(
            ResourceId::new("test", "gateway-2"),
            gateway("test", "gateway-2", "test-class", 200),
        )]
        .into_iter()
        .collect();

        let route_id = ResourceId::new("test", "hr-1");
        let mut routes: HashMap<_, _> = [(
            route_id.clone(),
            build_route(
                http_route("test", "hr-1", "gateway-2", &["foo.example.com"]),
                vec![ParentRef {
                    idx: 0,
                    gateway: ResourceId::new("test", "gateway-2"),
                    section_name: None,
                    attachment: None,
                }],
            ),
        )]
        .into_iter()
        .collect();

        let mut gw_node = test_util::built_gateway(
            "test",
            "gateway-1",
            vec![http_listener("listener-80-1", 80)],
        );

        bind_routes_to_listeners(&mut routes, Some(&mut gw_node), &ignored, &HashMap::new());

        let attachment = routes[&route_id].parent_refs[0].attachment.as_ref().unwrap();
        assert!(!attachment.attached);
        let failed = attachment.failed_condition.as_ref().unwrap();
        assert_eq!(failed.type_, "TODO");
        assert!(failed.message.contains("Gateway is ignored"));
    }
}
