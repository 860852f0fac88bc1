//! The subset of the Gateway API resource model this controller reads and
//! writes, defined the same way our own CRDs would be.

mod backendtlspolicy;
mod common;
mod gatewayclasses;
mod gateways;
mod httproute;
mod referencegrant;

pub use self::{
    backendtlspolicy::*, common::*, gatewayclasses::*, gateways::*, httproute::*,
    referencegrant::*,
};

/// The API group of every resource in this module.
pub const GROUP_NAME: &str = "gateway.networking.k8s.io";

/// Listener protocols this controller understands.
pub mod protocol {
    pub const HTTP: &str = "HTTP";
    pub const HTTPS: &str = "HTTPS";
}

/// The only supported TLS mode.
pub const TLS_MODE_TERMINATE: &str = "Terminate";

/// `allowedRoutes.namespaces.from` values.
pub mod from_namespaces {
    pub const ALL: &str = "All";
    pub const SELECTOR: &str = "Selector";
    pub const SAME: &str = "Same";
}

/// Path match types this controller supports.
pub mod path_match_type {
    pub const EXACT: &str = "Exact";
    pub const PATH_PREFIX: &str = "PathPrefix";
}

/// The `wellKnownCACerts` value naming the system trust store.
pub const WELL_KNOWN_CA_CERTS_SYSTEM: &str = "System";

/// Returns whether a group field names the core API group.
pub fn is_core_group(group: &Option<String>) -> bool {
    match group.as_deref() {
        None | Some("") | Some("core") => true,
        Some(_) => false,
    }
}

/// Returns whether a group field names the Gateway API group, which an
/// unspecified group defaults to in parentRefs.
pub fn is_gateway_group(group: &Option<String>) -> bool {
    match group.as_deref() {
        None | Some(GROUP_NAME) => true,
        Some(_) => false,
    }
}
