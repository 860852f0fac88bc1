//! Conditions attached to graph nodes during validation.
//!
//! Internal conditions carry no timestamps or generations; those are stamped
//! on when a condition set is converted for a status write. Constructors
//! exist for every condition this controller can produce so that reasons and
//! messages stay consistent between the graph builder and the status planner.

use nginx_gateway_controller_k8s_api::Time;

/// An internal representation of a `metav1.Condition`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
        }
    }
}

fn condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message: message.into(),
    }
}

/// Deduplicates conditions by type, keeping the last occurrence of each type
/// in the position of its first occurrence. Defaults are expected at the head
/// of the list so that specific conditions override them.
pub fn deduplicate_conditions(conds: Vec<Condition>) -> Vec<Condition> {
    let mut result: Vec<Condition> = Vec::with_capacity(conds.len());
    for cond in conds {
        match result.iter_mut().find(|c| c.type_ == cond.type_) {
            Some(existing) => *existing = cond,
            None => result.push(cond),
        }
    }
    result
}

/// Converts internal conditions into API conditions for a status write.
pub fn convert_conditions(
    conds: &[Condition],
    observed_generation: i64,
    transition_time: Time,
) -> Vec<nginx_gateway_controller_k8s_api::Condition> {
    conds
        .iter()
        .map(|c| nginx_gateway_controller_k8s_api::Condition {
            type_: c.type_.clone(),
            status: c.status.as_str().to_string(),
            reason: c.reason.clone(),
            message: c.message.clone(),
            observed_generation: Some(observed_generation),
            last_transition_time: transition_time.clone(),
        })
        .collect()
}

// Messages reported when an NGINX reload fails after a configuration was
// handed to the dataplane.
pub const GATEWAY_MESSAGE_FAILED_NGINX_RELOAD: &str = "The Gateway is not programmed due to a \
     failure to reload nginx with the configuration. Please see the nginx container logs for any \
     possible configuration issues";

pub const LISTENER_MESSAGE_FAILED_NGINX_RELOAD: &str = "The Listener is not programmed due to a \
     failure to reload nginx with the configuration. Please see the nginx container logs for any \
     possible configuration issues.";

pub fn route_message_failed_nginx_reload() -> String {
    format!(
        "{GATEWAY_MESSAGE_FAILED_NGINX_RELOAD}. NGINX may still be configured for this HTTPRoute. \
         However, future updates to this resource will not be configured until the Gateway is \
         programmed again"
    )
}

/// A placeholder for a condition that is not implemented yet.
pub fn new_todo(msg: &str) -> Condition {
    condition(
        "TODO",
        ConditionStatus::True,
        "TODO",
        format!("The condition for this has not been implemented yet: {msg}"),
    )
}

// === Route conditions ===

/// The conditions every accepted HTTPRoute starts from.
pub fn new_default_route_conditions() -> Vec<Condition> {
    vec![new_route_accepted(), new_route_resolved_refs()]
}

pub fn new_route_accepted() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::True,
        "Accepted",
        "The route is accepted",
    )
}

pub fn new_route_resolved_refs() -> Condition {
    condition(
        "ResolvedRefs",
        ConditionStatus::True,
        "ResolvedRefs",
        "All references are resolved",
    )
}

pub fn new_route_not_allowed_by_listeners() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "NotAllowedByListeners",
        "HTTPRoute is not allowed by any listener",
    )
}

pub fn new_route_no_matching_listener_hostname() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "NoMatchingListenerHostname",
        "Listener hostname does not match the HTTPRoute hostnames",
    )
}

pub fn new_route_no_matching_parent() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "NoMatchingParent",
        "Listener is not found for this parent ref",
    )
}

pub fn new_route_unsupported_value(msg: impl Into<String>) -> Condition {
    condition("Accepted", ConditionStatus::False, "UnsupportedValue", msg)
}

/// The message must start with "Dropped Rule(s)" per the Gateway API spec.
pub fn new_route_partially_invalid(msg: impl AsRef<str>) -> Condition {
    condition(
        "PartiallyInvalid",
        ConditionStatus::True,
        "UnsupportedValue",
        format!("Dropped Rule(s): {}", msg.as_ref()),
    )
}

pub fn new_route_invalid_listener() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "InvalidListener",
        "Listener is invalid for this parent ref",
    )
}

pub fn new_route_invalid_gateway() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "InvalidGateway",
        "Gateway is invalid",
    )
}

pub fn new_route_gateway_not_programmed(msg: impl Into<String>) -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "GatewayNotProgrammed",
        msg,
    )
}

pub fn new_route_backend_ref_invalid_kind(msg: impl Into<String>) -> Condition {
    condition("ResolvedRefs", ConditionStatus::False, "InvalidKind", msg)
}

pub fn new_route_backend_ref_ref_not_permitted(msg: impl Into<String>) -> Condition {
    condition("ResolvedRefs", ConditionStatus::False, "RefNotPermitted", msg)
}

pub fn new_route_backend_ref_ref_backend_not_found(msg: impl Into<String>) -> Condition {
    condition("ResolvedRefs", ConditionStatus::False, "BackendNotFound", msg)
}

pub fn new_route_backend_ref_unsupported_value(msg: impl Into<String>) -> Condition {
    condition(
        "ResolvedRefs",
        ConditionStatus::False,
        "UnsupportedValue",
        msg,
    )
}

// === Listener conditions ===

/// The conditions every valid Listener reports.
pub fn new_default_listener_conditions() -> Vec<Condition> {
    vec![
        new_listener_accepted(),
        new_listener_programmed(),
        new_listener_resolved_refs(),
        new_listener_no_conflicts(),
    ]
}

pub fn new_listener_accepted() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::True,
        "Accepted",
        "Listener is accepted",
    )
}

pub fn new_listener_programmed() -> Condition {
    condition(
        "Programmed",
        ConditionStatus::True,
        "Programmed",
        "Listener is programmed",
    )
}

pub fn new_listener_resolved_refs() -> Condition {
    condition(
        "ResolvedRefs",
        ConditionStatus::True,
        "ResolvedRefs",
        "All references are resolved",
    )
}

pub fn new_listener_no_conflicts() -> Condition {
    condition(
        "Conflicted",
        ConditionStatus::False,
        "NoConflicts",
        "No conflicts",
    )
}

pub fn new_listener_not_programmed_invalid(msg: impl Into<String>) -> Condition {
    condition("Programmed", ConditionStatus::False, "Invalid", msg)
}

pub fn new_listener_unsupported_value(msg: &str) -> Vec<Condition> {
    vec![
        condition("Accepted", ConditionStatus::False, "UnsupportedValue", msg),
        new_listener_not_programmed_invalid(msg),
    ]
}

pub fn new_listener_invalid_certificate_ref(msg: &str) -> Vec<Condition> {
    vec![
        condition(
            "Accepted",
            ConditionStatus::False,
            "InvalidCertificateRef",
            msg,
        ),
        condition(
            "ResolvedRefs",
            ConditionStatus::False,
            "InvalidCertificateRef",
            msg,
        ),
        new_listener_not_programmed_invalid(msg),
    ]
}

pub fn new_listener_invalid_route_kinds(msg: &str) -> Vec<Condition> {
    vec![
        condition(
            "ResolvedRefs",
            ConditionStatus::False,
            "InvalidRouteKinds",
            msg,
        ),
        new_listener_not_programmed_invalid(msg),
    ]
}

pub fn new_listener_protocol_conflict(msg: &str) -> Vec<Condition> {
    vec![
        condition("Accepted", ConditionStatus::False, "ProtocolConflict", msg),
        condition("Conflicted", ConditionStatus::True, "ProtocolConflict", msg),
        new_listener_not_programmed_invalid(msg),
    ]
}

pub fn new_listener_unsupported_protocol(msg: &str) -> Vec<Condition> {
    vec![
        condition(
            "Accepted",
            ConditionStatus::False,
            "UnsupportedProtocol",
            msg,
        ),
        new_listener_not_programmed_invalid(msg),
    ]
}

pub fn new_listener_ref_not_permitted(msg: &str) -> Vec<Condition> {
    vec![
        condition("Accepted", ConditionStatus::False, "RefNotPermitted", msg),
        condition(
            "ResolvedRefs",
            ConditionStatus::False,
            "RefNotPermitted",
            msg,
        ),
        new_listener_not_programmed_invalid(msg),
    ]
}

// === Gateway conditions ===

/// The conditions every valid Gateway reports.
pub fn new_default_gateway_conditions() -> Vec<Condition> {
    vec![new_gateway_accepted(), new_gateway_programmed()]
}

pub fn new_gateway_accepted() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::True,
        "Accepted",
        "Gateway is accepted",
    )
}

pub fn new_gateway_programmed() -> Condition {
    condition(
        "Programmed",
        ConditionStatus::True,
        "Programmed",
        "Gateway is programmed",
    )
}

pub const GATEWAY_MESSAGE_GATEWAY_CONFLICT: &str =
    "The resource is ignored due to a conflicting Gateway resource";

pub fn new_gateway_conflict() -> Vec<Condition> {
    vec![
        condition(
            "Accepted",
            ConditionStatus::False,
            "GatewayConflict",
            GATEWAY_MESSAGE_GATEWAY_CONFLICT,
        ),
        new_gateway_conflict_not_programmed(),
    ]
}

pub fn new_gateway_conflict_not_programmed() -> Condition {
    condition(
        "Programmed",
        ConditionStatus::False,
        "GatewayConflict",
        GATEWAY_MESSAGE_GATEWAY_CONFLICT,
    )
}

pub fn new_gateway_accepted_listeners_not_valid() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::True,
        "ListenersNotValid",
        "Gateway has at least one valid listener",
    )
}

pub fn new_gateway_not_accepted_listeners_not_valid() -> Vec<Condition> {
    let msg = "Gateway has no valid listeners";
    vec![
        condition("Accepted", ConditionStatus::False, "ListenersNotValid", msg),
        new_gateway_not_programmed_invalid(msg),
    ]
}

pub fn new_gateway_invalid(msg: &str) -> Vec<Condition> {
    vec![
        condition("Accepted", ConditionStatus::False, "Invalid", msg),
        new_gateway_not_programmed_invalid(msg),
    ]
}

pub fn new_gateway_unsupported_value(msg: &str) -> Vec<Condition> {
    vec![
        condition("Accepted", ConditionStatus::False, "UnsupportedValue", msg),
        condition(
            "Programmed",
            ConditionStatus::False,
            "UnsupportedValue",
            msg,
        ),
    ]
}

pub fn new_gateway_not_programmed_invalid(msg: impl Into<String>) -> Condition {
    condition("Programmed", ConditionStatus::False, "Invalid", msg)
}

// === GatewayClass conditions ===

/// The conditions the winning GatewayClass reports when nothing is wrong.
pub fn new_default_gateway_class_conditions() -> Vec<Condition> {
    vec![
        condition(
            "Accepted",
            ConditionStatus::True,
            "Accepted",
            "GatewayClass is accepted",
        ),
        new_gateway_class_supported_version(),
    ]
}

pub fn new_gateway_class_conflict() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "Conflicted",
        "The resource is ignored due to a conflicting GatewayClass resource",
    )
}

pub fn new_gateway_class_invalid_parameters(msg: impl Into<String>) -> Condition {
    condition(
        "Accepted",
        ConditionStatus::False,
        "InvalidParameters",
        msg,
    )
}

pub fn new_gateway_class_supported_version() -> Condition {
    condition(
        "SupportedVersion",
        ConditionStatus::True,
        "SupportedVersion",
        "Gateway API CRD versions are supported",
    )
}

pub fn new_gateway_class_unsupported_version(msg: impl Into<String>) -> Condition {
    condition(
        "SupportedVersion",
        ConditionStatus::False,
        "UnsupportedVersion",
        msg,
    )
}

// === BackendTLSPolicy conditions ===

pub fn new_backend_tls_policy_accepted() -> Condition {
    condition(
        "Accepted",
        ConditionStatus::True,
        "Accepted",
        "BackendTLSPolicy is accepted by the Gateway",
    )
}

pub fn new_backend_tls_policy_invalid(msg: impl Into<String>) -> Condition {
    condition("Accepted", ConditionStatus::False, "Invalid", msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplication_keeps_the_last_condition_per_type() {
        let mut conds = new_default_route_conditions();
        conds.push(new_route_backend_ref_ref_not_permitted("nope"));
        conds.push(new_route_no_matching_parent());

        let deduped = deduplicate_conditions(conds);

        assert_eq!(deduped.len(), 2);
        // The Accepted default was overridden by NoMatchingParent, in place.
        assert_eq!(deduped[0].reason, "NoMatchingParent");
        assert_eq!(deduped[0].status, ConditionStatus::False);
        // The ResolvedRefs default was overridden by RefNotPermitted.
        assert_eq!(deduped[1].reason, "RefNotPermitted");
    }

    #[test]
    fn deduplication_preserves_distinct_types() {
        let conds = vec![new_route_accepted(), new_route_partially_invalid("rule 1")];
        assert_eq!(deduplicate_conditions(conds).len(), 2);
    }

    #[test]
    fn conversion_stamps_generation_and_time() {
        let time = Time(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let api = convert_conditions(&[new_gateway_accepted()], 7, time.clone());

        assert_eq!(api.len(), 1);
        assert_eq!(api[0].type_, "Accepted");
        assert_eq!(api[0].status, "True");
        assert_eq!(api[0].observed_generation, Some(7));
        assert_eq!(api[0].last_transition_time, time);
    }
}
