//! Computes status updates for the watched Gateway API resources.
//!
//! The planner turns a graph into a list of [`UpdateRequest`]s; each request
//! carries the computed status for one object and applies itself to the live
//! object only when the content differs. A reconcile that changes nothing
//! therefore issues zero writes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod prepare;
mod setters;

pub use self::prepare::{
    prepare_backend_tls_policy_requests, prepare_gateway_class_requests, prepare_gateway_requests,
    prepare_route_requests, NginxReloadResult,
};

use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::gateway as gw;

/// A pending status write for one object.
///
/// The kinds form a closed set; the writer dispatches on the variant to pick
/// the API to fetch-modify-write through.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateRequest {
    GatewayClass {
        id: ResourceId,
        status: gw::GatewayClassStatus,
    },
    Gateway {
        id: ResourceId,
        status: gw::GatewayStatus,
    },
    HttpRoute {
        id: ResourceId,
        status: gw::HTTPRouteStatus,
        controller_name: String,
    },
    BackendTlsPolicy {
        id: ResourceId,
        status: gw::PolicyStatus,
        controller_name: String,
    },
}

impl UpdateRequest {
    pub fn id(&self) -> &ResourceId {
        match self {
            Self::GatewayClass { id, .. }
            | Self::Gateway { id, .. }
            | Self::HttpRoute { id, .. }
            | Self::BackendTlsPolicy { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GatewayClass { .. } => "GatewayClass",
            Self::Gateway { .. } => "Gateway",
            Self::HttpRoute { .. } => "HTTPRoute",
            Self::BackendTlsPolicy { .. } => "BackendTLSPolicy",
        }
    }

    /// Applies the computed GatewayClass status; returns whether the object
    /// changed.
    pub fn apply_to_gateway_class(&self, gc: &mut gw::GatewayClass) -> bool {
        match self {
            Self::GatewayClass { status, .. } => {
                setters::set_gateway_class_status(gc, status.clone())
            }
            _ => false,
        }
    }

    pub fn apply_to_gateway(&self, gateway: &mut gw::Gateway) -> bool {
        match self {
            Self::Gateway { status, .. } => setters::set_gateway_status(gateway, status.clone()),
            _ => false,
        }
    }

    pub fn apply_to_http_route(&self, route: &mut gw::HTTPRoute) -> bool {
        match self {
            Self::HttpRoute {
                status,
                controller_name,
                ..
            } => setters::set_http_route_status(route, status.clone(), controller_name),
            _ => false,
        }
    }

    pub fn apply_to_backend_tls_policy(&self, policy: &mut gw::BackendTLSPolicy) -> bool {
        match self {
            Self::BackendTlsPolicy {
                status,
                controller_name,
                ..
            } => setters::set_backend_tls_policy_status(policy, status.clone(), controller_name),
            _ => false,
        }
    }
}
