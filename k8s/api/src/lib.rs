#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod gateway;
pub mod labels;

pub use self::labels::Labels;
pub use k8s_openapi::{
    api::{
        core::v1::{ConfigMap, Namespace, Secret, Service, ServicePort},
        discovery::v1::EndpointSlice,
    },
    apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, ObjectMeta, Time},
};
pub use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client, Error, Resource, ResourceExt,
};

/// The label EndpointSlices carry to name their owning Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// The annotation the Gateway API CRDs carry to declare the installed bundle
/// version.
pub const BUNDLE_VERSION_ANNOTATION: &str = "gateway.networking.k8s.io/bundle-version";

/// The secret type of TLS secrets.
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Key of the certificate in a TLS secret.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Key of the private key in a TLS secret.
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Key of the CA certificate in a ConfigMap referenced by a BackendTLSPolicy.
pub const CA_CERT_KEY: &str = "ca.crt";
