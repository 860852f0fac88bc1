//! Resolvers answer reference questions during a graph build.
//!
//! The secret and config map resolvers record every key they are asked
//! about, so the graph's referenced-object maps contain entries for objects
//! that do not exist yet. An upsert of such an object is then classified as
//! relevant by the change tracker.

use super::{CaCertConfigMap, Secret as SecretNode};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway::{self as gw, ReferenceGrant},
    ConfigMap, Secret, CA_CERT_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE,
};
use std::io::Cursor;

/// A typed failure to resolve a referenced object.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{0} does not exist")]
    NotFound(ResourceId),
    #[error("{0} is of wrong type; expected {1}")]
    WrongType(ResourceId, &'static str),
    #[error("{0} is missing the {1} key")]
    MissingKey(ResourceId, &'static str),
    #[error("failed to decode {1} of {0} as PEM")]
    DecodeFailed(ResourceId, &'static str),
}

// === ReferenceGrantResolver ===

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct AllowedReference {
    to_kind: String,
    to_namespace: String,
    /// Empty when the grant covers every name of the kind.
    to_name: String,
    from_group: String,
    from_kind: String,
    from_namespace: String,
}

/// The target of a cross-namespace reference.
pub(crate) struct ToRef {
    kind: &'static str,
    id: ResourceId,
}

pub(crate) fn to_secret(id: ResourceId) -> ToRef {
    ToRef { kind: "Secret", id }
}

pub(crate) fn to_service(id: ResourceId) -> ToRef {
    ToRef { kind: "Service", id }
}

/// The origin of a cross-namespace reference.
pub(crate) struct FromRef {
    group: &'static str,
    kind: &'static str,
    namespace: String,
}

pub(crate) fn from_http_route(namespace: String) -> FromRef {
    FromRef {
        group: gw::GROUP_NAME,
        kind: "HTTPRoute",
        namespace,
    }
}

pub(crate) fn from_gateway(namespace: String) -> FromRef {
    FromRef {
        group: gw::GROUP_NAME,
        kind: "Gateway",
        namespace,
    }
}

/// Answers whether a ReferenceGrant permits a cross-namespace reference.
/// Evaluation is pure; grants are compiled once per graph build.
pub(crate) struct ReferenceGrantResolver {
    allowed: HashSet<AllowedReference>,
}

impl ReferenceGrantResolver {
    pub(crate) fn new(grants: &HashMap<ResourceId, ReferenceGrant>) -> Self {
        let mut allowed = HashSet::new();

        for (id, grant) in grants {
            for to in &grant.spec.to {
                if !(to.group.is_empty() || to.group == "core" || to.group == gw::GROUP_NAME) {
                    continue;
                }
                for from in &grant.spec.from {
                    allowed.insert(AllowedReference {
                        to_kind: to.kind.clone(),
                        to_namespace: id.namespace.clone(),
                        to_name: to.name.clone().unwrap_or_default(),
                        from_group: from.group.clone(),
                        from_kind: from.kind.clone(),
                        from_namespace: from.namespace.clone(),
                    });
                }
            }
        }

        Self { allowed }
    }

    pub(crate) fn ref_allowed(&self, to: &ToRef, from: &FromRef) -> bool {
        // An unspecified name in the grant covers any name of the kind.
        [to.id.name.as_str(), ""].iter().any(|name| {
            self.allowed.contains(&AllowedReference {
                to_kind: to.kind.to_string(),
                to_namespace: to.id.namespace.clone(),
                to_name: name.to_string(),
                from_group: from.group.to_string(),
                from_kind: from.kind.to_string(),
                from_namespace: from.namespace.clone(),
            })
        })
    }
}

// === SecretResolver ===

/// Resolves TLS secrets referenced by listeners, recording every key asked
/// about.
pub(crate) struct SecretResolver<'a> {
    secrets: &'a HashMap<ResourceId, Secret>,
    resolved: HashMap<ResourceId, SecretNode>,
}

impl<'a> SecretResolver<'a> {
    pub(crate) fn new(secrets: &'a HashMap<ResourceId, Secret>) -> Self {
        Self {
            secrets,
            resolved: HashMap::new(),
        }
    }

    pub(crate) fn resolve(&mut self, id: &ResourceId) -> Result<(), ResolveError> {
        if let Some(node) = self.resolved.get(id) {
            return match &node.source {
                Some(secret) => validate_tls_secret(id, secret),
                None => Err(ResolveError::NotFound(id.clone())),
            };
        }

        let secret = self.secrets.get(id);
        self.resolved.insert(
            id.clone(),
            SecretNode {
                source: secret.cloned(),
            },
        );

        match secret {
            Some(secret) => validate_tls_secret(id, secret),
            None => Err(ResolveError::NotFound(id.clone())),
        }
    }

    /// Every secret asked about during this build, existing or not.
    pub(crate) fn into_resolved_secrets(self) -> HashMap<ResourceId, SecretNode> {
        self.resolved
    }
}

fn validate_tls_secret(id: &ResourceId, secret: &Secret) -> Result<(), ResolveError> {
    if secret.type_.as_deref() != Some(TLS_SECRET_TYPE) {
        return Err(ResolveError::WrongType(id.clone(), TLS_SECRET_TYPE));
    }

    let data = secret
        .data
        .as_ref()
        .ok_or(ResolveError::MissingKey(id.clone(), TLS_CERT_KEY))?;

    let cert = data
        .get(TLS_CERT_KEY)
        .ok_or(ResolveError::MissingKey(id.clone(), TLS_CERT_KEY))?;
    let key = data
        .get(TLS_PRIVATE_KEY_KEY)
        .ok_or(ResolveError::MissingKey(id.clone(), TLS_PRIVATE_KEY_KEY))?;

    let certs = rustls_pemfile::certs(&mut Cursor::new(&cert.0))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ResolveError::DecodeFailed(id.clone(), TLS_CERT_KEY))?;
    if certs.is_empty() {
        return Err(ResolveError::DecodeFailed(id.clone(), TLS_CERT_KEY));
    }

    match rustls_pemfile::private_key(&mut Cursor::new(&key.0)) {
        Ok(Some(_)) => Ok(()),
        _ => Err(ResolveError::DecodeFailed(id.clone(), TLS_PRIVATE_KEY_KEY)),
    }
}

// === ConfigMapResolver ===

/// Resolves CA certificate ConfigMaps referenced by backend TLS policies,
/// recording every key asked about.
pub(crate) struct ConfigMapResolver<'a> {
    config_maps: &'a HashMap<ResourceId, ConfigMap>,
    resolved: HashMap<ResourceId, CaCertConfigMap>,
}

impl<'a> ConfigMapResolver<'a> {
    pub(crate) fn new(config_maps: &'a HashMap<ResourceId, ConfigMap>) -> Self {
        Self {
            config_maps,
            resolved: HashMap::new(),
        }
    }

    pub(crate) fn resolve(&mut self, id: &ResourceId) -> Result<(), ResolveError> {
        if let Some(node) = self.resolved.get(id) {
            return match &node.source {
                Some(_) if node.ca_cert.is_some() => Ok(()),
                Some(cm) => validate_ca_config_map(id, cm).map(|_| ()),
                None => Err(ResolveError::NotFound(id.clone())),
            };
        }

        let config_map = self.config_maps.get(id);

        let (node, result) = match config_map {
            None => (
                CaCertConfigMap {
                    source: None,
                    ca_cert: None,
                },
                Err(ResolveError::NotFound(id.clone())),
            ),
            Some(cm) => match validate_ca_config_map(id, cm) {
                Ok(ca_cert) => (
                    CaCertConfigMap {
                        source: Some(cm.clone()),
                        ca_cert: Some(ca_cert),
                    },
                    Ok(()),
                ),
                Err(err) => (
                    CaCertConfigMap {
                        source: Some(cm.clone()),
                        ca_cert: None,
                    },
                    Err(err),
                ),
            },
        };

        self.resolved.insert(id.clone(), node);
        result
    }

    /// Every config map asked about during this build, existing or not.
    pub(crate) fn into_resolved_config_maps(self) -> HashMap<ResourceId, CaCertConfigMap> {
        self.resolved
    }
}

fn validate_ca_config_map(id: &ResourceId, config_map: &ConfigMap) -> Result<Vec<u8>, ResolveError> {
    let ca_cert: Vec<u8> = match (
        config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CA_CERT_KEY)),
        config_map
            .binary_data
            .as_ref()
            .and_then(|data| data.get(CA_CERT_KEY)),
    ) {
        (Some(text), _) => text.clone().into_bytes(),
        (None, Some(bytes)) => bytes.0.clone(),
        (None, None) => return Err(ResolveError::MissingKey(id.clone(), CA_CERT_KEY)),
    };

    let certs = rustls_pemfile::certs(&mut Cursor::new(&ca_cert))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ResolveError::DecodeFailed(id.clone(), CA_CERT_KEY))?;
    if certs.is_empty() {
        return Err(ResolveError::DecodeFailed(id.clone(), CA_CERT_KEY));
    }

    Ok(ca_cert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use nginx_gateway_controller_k8s_api::gateway::{ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
    use nginx_gateway_controller_k8s_api::ObjectMeta;

    use crate::test_util::{tls_secret, TEST_CERT};

    fn grant(ns: &str, from: (&str, &str, &str), to: (&str, Option<&str>)) -> ReferenceGrant {
        ReferenceGrant {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some("grant".to_string()),
                ..Default::default()
            },
            spec: ReferenceGrantSpec {
                from: vec![ReferenceGrantFrom {
                    group: from.0.to_string(),
                    kind: from.1.to_string(),
                    namespace: from.2.to_string(),
                }],
                to: vec![ReferenceGrantTo {
                    group: String::new(),
                    kind: to.0.to_string(),
                    name: to.1.map(str::to_string),
                }],
            },
        }
    }

    #[test]
    fn reference_grants_gate_cross_namespace_refs() {
        let grants: HashMap<ResourceId, ReferenceGrant> = [
            (
                ResourceId::new("secret-ns", "grant"),
                grant(
                    "secret-ns",
                    (gw::GROUP_NAME, "Gateway", "gw-ns"),
                    ("Secret", None),
                ),
            ),
            (
                ResourceId::new("service-ns", "grant"),
                grant(
                    "service-ns",
                    (gw::GROUP_NAME, "HTTPRoute", "test"),
                    ("Service", Some("service")),
                ),
            ),
        ]
        .into_iter()
        .collect();

        let resolver = ReferenceGrantResolver::new(&grants);

        // Any secret name is covered by the unnamed grant.
        assert!(resolver.ref_allowed(
            &to_secret(ResourceId::new("secret-ns", "any")),
            &from_gateway("gw-ns".to_string()),
        ));
        // The wrong origin namespace is not covered.
        assert!(!resolver.ref_allowed(
            &to_secret(ResourceId::new("secret-ns", "any")),
            &from_gateway("other".to_string()),
        ));
        // The named service grant covers only that name.
        assert!(resolver.ref_allowed(
            &to_service(ResourceId::new("service-ns", "service")),
            &from_http_route("test".to_string()),
        ));
        assert!(!resolver.ref_allowed(
            &to_service(ResourceId::new("service-ns", "other")),
            &from_http_route("test".to_string()),
        ));
        // Kinds do not cross over.
        assert!(!resolver.ref_allowed(
            &to_service(ResourceId::new("secret-ns", "any")),
            &from_http_route("gw-ns".to_string()),
        ));
    }

    #[test]
    fn secret_resolver_records_missing_secrets() {
        let (id, secret) = tls_secret("test", "secret-1");
        let secrets: HashMap<_, _> = [(id.clone(), secret)].into_iter().collect();
        let mut resolver = SecretResolver::new(&secrets);

        assert_eq!(resolver.resolve(&id), Ok(()));

        let missing = ResourceId::new("test", "missing");
        assert_eq!(
            resolver.resolve(&missing),
            Err(ResolveError::NotFound(missing.clone()))
        );

        let resolved = resolver.into_resolved_secrets();
        assert_eq!(resolved.len(), 2);
        assert!(resolved[&id].source.is_some());
        assert!(resolved[&missing].source.is_none());
    }

    #[test]
    fn secret_resolver_rejects_non_tls_secrets() {
        let (id, mut secret) = tls_secret("test", "secret-1");
        secret.type_ = Some("Opaque".to_string());
        let secrets: HashMap<_, _> = [(id.clone(), secret)].into_iter().collect();
        let mut resolver = SecretResolver::new(&secrets);

        assert_eq!(
            resolver.resolve(&id),
            Err(ResolveError::WrongType(id, TLS_SECRET_TYPE))
        );
    }

    #[test]
    fn secret_resolver_rejects_garbage_pem() {
        let (id, mut secret) = tls_secret("test", "secret-1");
        secret
            .data
            .as_mut()
            .unwrap()
            .insert(TLS_PRIVATE_KEY_KEY.to_string(), ByteString(b"not pem".to_vec()));
        let secrets: HashMap<_, _> = [(id.clone(), secret)].into_iter().collect();
        let mut resolver = SecretResolver::new(&secrets);

        assert_eq!(
            resolver.resolve(&id),
            Err(ResolveError::DecodeFailed(id, TLS_PRIVATE_KEY_KEY))
        );
    }

    #[test]
    fn config_map_resolver_requires_a_ca_cert() {
        let id = ResourceId::new("test", "configmap-1");
        let cm = ConfigMap {
            metadata: ObjectMeta {
                namespace: Some("test".to_string()),
                name: Some("configmap-1".to_string()),
                ..Default::default()
            },
            data: Some(
                [(CA_CERT_KEY.to_string(), TEST_CERT.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        let empty_id = ResourceId::new("test", "empty");
        let empty = ConfigMap {
            metadata: ObjectMeta {
                namespace: Some("test".to_string()),
                name: Some("empty".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let config_maps: HashMap<_, _> =
            [(id.clone(), cm), (empty_id.clone(), empty)].into_iter().collect();
        let mut resolver = ConfigMapResolver::new(&config_maps);

        assert_eq!(resolver.resolve(&id), Ok(()));
        assert_eq!(
            resolver.resolve(&empty_id),
            Err(ResolveError::MissingKey(empty_id.clone(), CA_CERT_KEY))
        );

        let resolved = resolver.into_resolved_config_maps();
        assert!(resolved[&id].ca_cert.is_some());
        assert!(resolved[&empty_id].ca_cert.is_none());
    }
}
