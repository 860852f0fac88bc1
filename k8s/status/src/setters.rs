//! Equality-gated status setters.
//!
//! Each setter overwrites an object's status only when the computed content
//! differs from what the object already carries. The comparisons ignore
//! `lastTransitionTime` (a timestamp-only change is not a change) and treat
//! a nil pointer-valued string as equal to an empty one, matching how the
//! API server normalizes these fields.

use nginx_gateway_controller_k8s_api::{gateway as gw, Condition};

pub(crate) fn set_gateway_class_status(
    gc: &mut gw::GatewayClass,
    status: gw::GatewayClassStatus,
) -> bool {
    let current = gc.status.get_or_insert_with(Default::default);
    if conditions_equal(&current.conditions, &status.conditions) {
        return false;
    }
    *current = status;
    true
}

pub(crate) fn set_gateway_status(gateway: &mut gw::Gateway, status: gw::GatewayStatus) -> bool {
    let current = gateway.status.get_or_insert_with(Default::default);
    if gateway_status_equal(current, &status) {
        return false;
    }
    *current = status;
    true
}

pub(crate) fn set_http_route_status(
    route: &mut gw::HTTPRoute,
    mut status: gw::HTTPRouteStatus,
    controller_name: &str,
) -> bool {
    let current = route.status.get_or_insert_with(Default::default);

    // Parent statuses owned by other controllers are preserved verbatim.
    for parent in &current.parents {
        if parent.controller_name != controller_name {
            status.parents.push(parent.clone());
        }
    }

    if http_route_status_equal(controller_name, current, &status) {
        return false;
    }
    *current = status;
    true
}

pub(crate) fn set_backend_tls_policy_status(
    policy: &mut gw::BackendTLSPolicy,
    mut status: gw::PolicyStatus,
    controller_name: &str,
) -> bool {
    let current = policy.status.get_or_insert_with(Default::default);

    // Ancestor statuses owned by other controllers are preserved verbatim,
    // ahead of this controller's entries.
    let mut ancestors: Vec<gw::PolicyAncestorStatus> = current
        .ancestors
        .iter()
        .filter(|ancestor| ancestor.controller_name != controller_name)
        .cloned()
        .collect();
    ancestors.append(&mut status.ancestors);
    status.ancestors = ancestors;

    if policy_status_equal(controller_name, current, &status) {
        return false;
    }
    *current = status;
    true
}

/// Compares two optional values, treating `None` as the default value. The
/// Gateway API uses pointer-valued strings in several status types where nil
/// and empty are semantically identical.
pub(crate) fn equal_option<T: Default + PartialEq>(a: Option<&T>, b: Option<&T>) -> bool {
    let default = T::default();
    a.unwrap_or(&default) == b.unwrap_or(&default)
}

/// Order-independent condition-list equality on Type, Status, Reason,
/// Message and ObservedGeneration.
pub(crate) fn conditions_equal(prev: &[Condition], cur: &[Condition]) -> bool {
    if prev.len() != cur.len() {
        return false;
    }
    let contains = |haystack: &[Condition], needle: &Condition| {
        haystack.iter().any(|c| condition_equal(c, needle))
    };
    prev.iter().all(|c| contains(cur, c)) && cur.iter().all(|c| contains(prev, c))
}

fn condition_equal(a: &Condition, b: &Condition) -> bool {
    a.type_ == b.type_
        && a.status == b.status
        && a.reason == b.reason
        && a.message == b.message
        && a.observed_generation == b.observed_generation
}

pub(crate) fn gateway_status_equal(prev: &gw::GatewayStatus, cur: &gw::GatewayStatus) -> bool {
    let prev_addresses = prev.addresses.as_deref().unwrap_or_default();
    let cur_addresses = cur.addresses.as_deref().unwrap_or_default();
    if prev_addresses.len() != cur_addresses.len() {
        return false;
    }
    let addresses_equal = prev_addresses.iter().zip(cur_addresses).all(|(a, b)| {
        equal_option(a.type_.as_ref(), b.type_.as_ref()) && a.value == b.value
    });
    if !addresses_equal {
        return false;
    }

    if !conditions_equal(
        prev.conditions.as_deref().unwrap_or_default(),
        cur.conditions.as_deref().unwrap_or_default(),
    ) {
        return false;
    }

    let prev_listeners = prev.listeners.as_deref().unwrap_or_default();
    let cur_listeners = cur.listeners.as_deref().unwrap_or_default();
    if prev_listeners.len() != cur_listeners.len() {
        return false;
    }
    prev_listeners
        .iter()
        .zip(cur_listeners)
        .all(|(a, b)| listener_status_equal(a, b))
}

fn listener_status_equal(a: &gw::ListenerStatus, b: &gw::ListenerStatus) -> bool {
    if a.name != b.name || a.attached_routes != b.attached_routes {
        return false;
    }
    if !conditions_equal(&a.conditions, &b.conditions) {
        return false;
    }
    // Supported kinds compare as a set.
    a.supported_kinds.len() == b.supported_kinds.len()
        && a.supported_kinds.iter().all(|kind| {
            b.supported_kinds
                .iter()
                .any(|other| kind.kind == other.kind && equal_option(kind.group.as_ref(), other.group.as_ref()))
        })
}

/// Other controllers update route statuses concurrently, so the comparison
/// ignores order and only requires that this controller's entries agree.
pub(crate) fn http_route_status_equal(
    controller_name: &str,
    prev: &gw::HTTPRouteStatus,
    cur: &gw::HTTPRouteStatus,
) -> bool {
    for prev_parent in &prev.parents {
        if prev_parent.controller_name != controller_name {
            continue;
        }
        if !cur
            .parents
            .iter()
            .any(|cur_parent| route_parent_status_equal(prev_parent, cur_parent))
        {
            return false;
        }
    }

    cur.parents.iter().all(|cur_parent| {
        prev.parents
            .iter()
            .any(|prev_parent| route_parent_status_equal(cur_parent, prev_parent))
    })
}

fn route_parent_status_equal(a: &gw::RouteParentStatus, b: &gw::RouteParentStatus) -> bool {
    a.controller_name == b.controller_name
        && a.parent_ref.name == b.parent_ref.name
        && equal_option(a.parent_ref.namespace.as_ref(), b.parent_ref.namespace.as_ref())
        && equal_option(
            a.parent_ref.section_name.as_ref(),
            b.parent_ref.section_name.as_ref(),
        )
        // The remaining parentRef fields are never set by this controller.
        && conditions_equal(&a.conditions, &b.conditions)
}

pub(crate) fn policy_status_equal(
    controller_name: &str,
    prev: &gw::PolicyStatus,
    cur: &gw::PolicyStatus,
) -> bool {
    for prev_ancestor in &prev.ancestors {
        if prev_ancestor.controller_name != controller_name {
            continue;
        }
        if !cur
            .ancestors
            .iter()
            .any(|cur_ancestor| ancestor_status_equal(prev_ancestor, cur_ancestor))
        {
            return false;
        }
    }

    cur.ancestors.iter().all(|cur_ancestor| {
        prev.ancestors
            .iter()
            .any(|prev_ancestor| ancestor_status_equal(cur_ancestor, prev_ancestor))
    })
}

fn ancestor_status_equal(a: &gw::PolicyAncestorStatus, b: &gw::PolicyAncestorStatus) -> bool {
    a.controller_name == b.controller_name
        && a.ancestor_ref.name == b.ancestor_ref.name
        && equal_option(
            a.ancestor_ref.namespace.as_ref(),
            b.ancestor_ref.namespace.as_ref(),
        )
        && conditions_equal(&a.conditions, &b.conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginx_gateway_controller_k8s_api::Time;

    fn condition(type_: &str, status: &str, reason: &str, generation: i64) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: "msg".to_string(),
            observed_generation: Some(generation),
            last_transition_time: Time(chrono::DateTime::from_timestamp(0, 0).unwrap()),
        }
    }

    #[test]
    fn nil_and_empty_strings_compare_equal() {
        let empty = String::new();
        let value = "test".to_string();

        assert!(equal_option::<String>(None, None));
        assert!(equal_option(None, Some(&empty)));
        assert!(equal_option(Some(&empty), None));
        assert!(equal_option(Some(&value), Some(&value)));
        assert!(!equal_option(Some(&value), None));
    }

    #[test]
    fn condition_comparison_ignores_order_and_transition_time() {
        let mut a = condition("Accepted", "True", "Accepted", 1);
        let b = condition("ResolvedRefs", "True", "ResolvedRefs", 1);

        let mut later = a.clone();
        later.last_transition_time = Time(chrono::DateTime::from_timestamp(9999, 0).unwrap());

        assert!(conditions_equal(
            &[a.clone(), b.clone()],
            &[b.clone(), later.clone()]
        ));

        a.observed_generation = Some(2);
        assert!(!conditions_equal(&[a, b.clone()], &[b.clone(), later]));
    }

    #[test]
    fn setting_an_identical_gateway_class_status_is_a_no_op() {
        let status = gw::GatewayClassStatus {
            conditions: vec![condition("Accepted", "True", "Accepted", 1)],
        };
        let mut gc = gw::GatewayClass {
            status: Some(status.clone()),
            ..Default::default()
        };

        assert!(!set_gateway_class_status(&mut gc, status.clone()));

        let changed = gw::GatewayClassStatus {
            conditions: vec![condition("Accepted", "False", "Invalid", 1)],
        };
        assert!(set_gateway_class_status(&mut gc, changed.clone()));
        assert_eq!(gc.status, Some(changed));
    }

    #[test]
    fn gateway_status_comparison_covers_listeners_and_addresses() {
        let listener = |attached: i32| gw::ListenerStatus {
            name: "listener-80-1".to_string(),
            supported_kinds: vec![gw::RouteGroupKind::http_route()],
            attached_routes: attached,
            conditions: vec![condition("Accepted", "True", "Accepted", 1)],
        };
        let status = |attached: i32| gw::GatewayStatus {
            addresses: Some(vec![]),
            conditions: Some(vec![condition("Accepted", "True", "Accepted", 1)]),
            listeners: Some(vec![listener(attached)]),
        };

        // Nil and empty address lists are the same.
        let mut none_addresses = status(1);
        none_addresses.addresses = None;
        assert!(gateway_status_equal(&status(1), &none_addresses));

        assert!(!gateway_status_equal(&status(1), &status(2)));
    }

    #[test]
    fn foreign_route_parent_statuses_are_preserved() {
        let ours = gw::RouteParentStatus {
            parent_ref: gw::ParentReference {
                namespace: Some("test".to_string()),
                name: "gateway-1".to_string(),
                ..Default::default()
            },
            controller_name: "my.controller/nginx-gateway".to_string(),
            conditions: vec![condition("Accepted", "True", "Accepted", 1)],
        };
        let foreign = gw::RouteParentStatus {
            parent_ref: gw::ParentReference {
                name: "other-gateway".to_string(),
                ..Default::default()
            },
            controller_name: "someone.else/controller".to_string(),
            conditions: vec![],
        };

        let mut route = gw::HTTPRoute {
            status: Some(gw::HTTPRouteStatus {
                parents: vec![foreign.clone(), ours.clone()],
            }),
            ..Default::default()
        };

        // Re-applying our own status with the foreign entry present on the
        // object does not write.
        let wrote = set_http_route_status(
            &mut route,
            gw::HTTPRouteStatus {
                parents: vec![ours.clone()],
            },
            "my.controller/nginx-gateway",
        );
        assert!(!wrote);

        // A changed status writes and keeps the foreign entry.
        let mut changed = ours.clone();
        changed.conditions = vec![condition("Accepted", "False", "NoMatchingParent", 1)];
        let wrote = set_http_route_status(
            &mut route,
            gw::HTTPRouteStatus {
                parents: vec![changed],
            },
            "my.controller/nginx-gateway",
        );
        assert!(wrote);
        let parents = &route.status.as_ref().unwrap().parents;
        assert_eq!(parents.len(), 2);
        assert!(parents
            .iter()
            .any(|p| p.controller_name == "someone.else/controller"));
    }

    #[test]
    fn foreign_policy_ancestors_are_preserved() {
        let foreign = gw::PolicyAncestorStatus {
            ancestor_ref: gw::ParentReference {
                name: "other-gateway".to_string(),
                ..Default::default()
            },
            controller_name: "someone.else/controller".to_string(),
            conditions: vec![],
        };
        let ours = gw::PolicyAncestorStatus {
            ancestor_ref: gw::ParentReference {
                namespace: Some("test".to_string()),
                name: "gateway-1".to_string(),
                ..Default::default()
            },
            controller_name: "my.controller/nginx-gateway".to_string(),
            conditions: vec![condition("Accepted", "True", "Accepted", 1)],
        };

        let mut policy = gw::BackendTLSPolicy {
            status: Some(gw::PolicyStatus {
                ancestors: vec![foreign.clone()],
            }),
            ..Default::default()
        };

        let wrote = set_backend_tls_policy_status(
            &mut policy,
            gw::PolicyStatus {
                ancestors: vec![ours.clone()],
            },
            "my.controller/nginx-gateway",
        );
        assert!(wrote);
        let ancestors = &policy.status.as_ref().unwrap().ancestors;
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].controller_name, "someone.else/controller");

        // Applying the same thing again is a no-op.
        let wrote = set_backend_tls_policy_status(
            &mut policy,
            gw::PolicyStatus {
                ancestors: vec![ours],
            },
            "my.controller/nginx-gateway",
        );
        assert!(!wrote);
    }
}
