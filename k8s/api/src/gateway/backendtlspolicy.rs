use super::common::PolicyStatus;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BackendTLSPolicy provides a way to configure how a Gateway connects to a
/// backend over TLS.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "BackendTLSPolicy",
    status = "PolicyStatus",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackendTLSPolicySpec {
    /// TargetRef identifies the Service this policy applies to.
    pub target_ref: PolicyTargetReference,

    /// TLS contains the verification configuration.
    pub tls: BackendTLSPolicyConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendTLSPolicyConfig {
    /// CACertRefs names ConfigMaps holding the CA certificates to validate
    /// the backend against; mutually exclusive with `wellKnownCACerts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_refs: Option<Vec<LocalObjectReference>>,

    /// WellKnownCACerts names a controller-known certificate set; only
    /// `System` is supported. Mutually exclusive with `caCertRefs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well_known_ca_certs: Option<String>,

    /// Hostname used for SNI and server certificate validation.
    pub hostname: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}
