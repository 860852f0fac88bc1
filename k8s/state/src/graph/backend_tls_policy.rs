use super::{hostnames::validate_sni_hostname, resolvers::ConfigMapResolver, Gateway};
use crate::conditions::{self, Condition};
use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway::{self as gw, POLICY_ANCESTOR_LIMIT, WELL_KNOWN_CA_CERTS_SYSTEM},
    ResourceExt,
};

/// A processed BackendTLSPolicy.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendTlsPolicy {
    pub source: gw::BackendTLSPolicy,
    /// The ConfigMap holding the CA bundle, when the policy is valid and
    /// uses caCertRefs.
    pub ca_cert_ref: Option<ResourceId>,
    /// The Gateway this policy was evaluated against.
    pub gateway: ResourceId,
    pub conditions: Vec<Condition>,
    pub valid: bool,
    /// Set once a BackendRef selects the policy.
    pub is_referenced: bool,
    /// Set when the ancestor status is full and this controller is not among
    /// the ancestors; such a policy gets no status update.
    pub ignored: bool,
}

impl BackendTlsPolicy {
    /// The Service this policy attaches to.
    pub fn target_service(&self) -> ResourceId {
        let namespace = self
            .source
            .spec
            .target_ref
            .namespace
            .clone()
            .unwrap_or_else(|| self.source.namespace().unwrap_or_default());
        ResourceId::new(namespace, self.source.spec.target_ref.name.clone())
    }
}

pub(crate) fn process_backend_tls_policies(
    policies: &HashMap<ResourceId, gw::BackendTLSPolicy>,
    config_map_resolver: &mut ConfigMapResolver<'_>,
    controller_name: &str,
    gateway: Option<&Gateway>,
) -> HashMap<ResourceId, BackendTlsPolicy> {
    let Some(gateway) = gateway else {
        return HashMap::new();
    };
    let gateway_id = gateway.id();

    let mut processed = HashMap::with_capacity(policies.len());
    for (id, policy) in policies {
        let (valid, ignored, conds) =
            validate_backend_tls_policy(policy, config_map_resolver, controller_name, &gateway_id);

        let ca_cert_ref = if valid && !ignored {
            policy
                .spec
                .tls
                .ca_cert_refs
                .as_ref()
                .and_then(|refs| refs.first())
                .map(|r| {
                    ResourceId::new(policy.namespace().unwrap_or_default(), r.name.clone())
                })
        } else {
            None
        };

        processed.insert(
            id.clone(),
            BackendTlsPolicy {
                source: policy.clone(),
                ca_cert_ref,
                gateway: gateway_id.clone(),
                conditions: conds,
                valid,
                is_referenced: false,
                ignored,
            },
        );
    }

    processed
}

fn validate_backend_tls_policy(
    policy: &gw::BackendTLSPolicy,
    config_map_resolver: &mut ConfigMapResolver<'_>,
    controller_name: &str,
    gateway_id: &ResourceId,
) -> (bool, bool, Vec<Condition>) {
    let mut valid = true;
    let mut ignored = false;
    let mut conds = Vec::new();

    if ancestors_full(policy, controller_name, gateway_id) {
        valid = false;
        ignored = true;
    }

    if let Err(err) = validate_sni_hostname(&policy.spec.tls.hostname) {
        valid = false;
        conds.push(conditions::new_backend_tls_policy_invalid(format!(
            "invalid hostname: {err}",
        )));
    }

    let tls = &policy.spec.tls;
    match (&tls.ca_cert_refs, &tls.well_known_ca_certs) {
        (Some(_), Some(_)) => {
            valid = false;
            conds.push(conditions::new_backend_tls_policy_invalid(
                "CACertRefs and WellKnownCACerts are mutually exclusive",
            ));
        }
        (Some(refs), None) if !refs.is_empty() => {
            if let Err(err) = validate_ca_cert_refs(policy, refs, config_map_resolver) {
                valid = false;
                conds.push(conditions::new_backend_tls_policy_invalid(format!(
                    "invalid CACertRef: {err}",
                )));
            }
        }
        (None, Some(well_known)) => {
            if well_known != WELL_KNOWN_CA_CERTS_SYSTEM {
                valid = false;
                conds.push(conditions::new_backend_tls_policy_invalid(format!(
                    "invalid WellKnownCACerts: tls.wellKnownCACerts: Unsupported value: \
                     {well_known:?}: supported values: \"System\"",
                )));
            }
        }
        _ => {
            valid = false;
            conds.push(conditions::new_backend_tls_policy_invalid(
                "CACertRefs and WellKnownCACerts are both nil",
            ));
        }
    }

    (valid, ignored, conds)
}

/// The API caps ancestor statuses at 16. A full list is fine when this
/// controller already holds a slot for this gateway; otherwise a new
/// ancestor cannot be recorded and the policy is ignored.
fn ancestors_full(
    policy: &gw::BackendTLSPolicy,
    controller_name: &str,
    gateway_id: &ResourceId,
) -> bool {
    let Some(status) = &policy.status else {
        return false;
    };
    if status.ancestors.len() < POLICY_ANCESTOR_LIMIT {
        return false;
    }

    let already_ancestor = status.ancestors.iter().any(|ancestor| {
        ancestor.controller_name == controller_name
            && ancestor.ancestor_ref.name == gateway_id.name
            && ancestor.ancestor_ref.namespace.as_deref() == Some(gateway_id.namespace.as_str())
    });

    !already_ancestor
}

fn validate_ca_cert_refs(
    policy: &gw::BackendTLSPolicy,
    refs: &[gw::LocalObjectReference],
    config_map_resolver: &mut ConfigMapResolver<'_>,
) -> Result<(), String> {
    if refs.len() != 1 {
        return Err(format!(
            "tls.caCertRefs: Too many: {}: must have at most 1 items",
            refs.len(),
        ));
    }

    let ca_ref = &refs[0];
    if ca_ref.kind != "ConfigMap" {
        return Err(format!(
            "tls.caCertRefs[0].kind: Unsupported value: {:?}: supported values: \"ConfigMap\"",
            ca_ref.kind,
        ));
    }
    if !(ca_ref.group.is_empty() || ca_ref.group == "core") {
        return Err(format!(
            "tls.caCertRefs[0].group: Unsupported value: {:?}: supported values: \"\", \"core\"",
            ca_ref.group,
        ));
    }

    let id = ResourceId::new(
        policy.namespace().unwrap_or_default(),
        ca_ref.name.clone(),
    );
    config_map_resolver
        .resolve(&id)
        .map_err(|err| format!("tls.caCertRefs[0]: Invalid value: {id}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{
        backend_tls_policy, backend_tls_policy_well_known, built_gateway, ca_config_map,
        http_listener,
    };

    fn process_one(
        policy: gw::BackendTLSPolicy,
        config_maps: &HashMap<ResourceId, nginx_gateway_controller_k8s_api::ConfigMap>,
    ) -> BackendTlsPolicy {
        let id = ResourceId::new(
            policy.namespace().unwrap(),
            policy.name_unchecked(),
        );
        let policies: HashMap<_, _> = [(id.clone(), policy)].into_iter().collect();
        let mut resolver = ConfigMapResolver::new(config_maps);
        let gateway = built_gateway("test", "gateway-1", vec![http_listener("listener-80-1", 80)]);

        let mut processed = process_backend_tls_policies(
            &policies,
            &mut resolver,
            "my.controller/nginx-gateway",
            Some(&gateway),
        );
        processed.remove(&id).unwrap()
    }

    #[test]
    fn a_policy_with_a_resolvable_ca_config_map_is_valid() {
        let config_maps: HashMap<_, _> = [ca_config_map("test", "configmap-1")].into_iter().collect();
        let (_, policy) = backend_tls_policy("test", "policy-1", "foo", "foo.example.com");

        let processed = process_one(policy, &config_maps);

        assert!(processed.valid, "{:?}", processed.conditions);
        assert!(!processed.ignored);
        assert_eq!(processed.ca_cert_ref, Some(ResourceId::new("test", "configmap-1")));
        assert_eq!(processed.gateway, ResourceId::new("test", "gateway-1"));
    }

    #[test]
    fn well_known_system_certs_are_the_only_supported_set() {
        let config_maps = HashMap::new();

        let (_, policy) =
            backend_tls_policy_well_known("test", "policy-1", "foo", "foo.example.com", "System");
        assert!(process_one(policy, &config_maps).valid);

        let (_, policy) =
            backend_tls_policy_well_known("test", "policy-1", "foo", "foo.example.com", "Custom");
        let processed = process_one(policy, &config_maps);
        assert!(!processed.valid);
        assert!(processed.conditions[0].message.contains("WellKnownCACerts"));
    }

    #[test]
    fn cert_sources_are_mutually_exclusive() {
        let config_maps: HashMap<_, _> = [ca_config_map("test", "configmap-1")].into_iter().collect();

        let (_, mut policy) = backend_tls_policy("test", "policy-1", "foo", "foo.example.com");
        policy.spec.tls.well_known_ca_certs = Some("System".to_string());

        let processed = process_one(policy, &config_maps);
        assert!(!processed.valid);
        assert!(processed.conditions[0].message.contains("mutually exclusive"));
    }

    #[test]
    fn wildcard_hostnames_are_invalid_for_sni() {
        let config_maps: HashMap<_, _> = [ca_config_map("test", "configmap-1")].into_iter().collect();
        let (_, policy) = backend_tls_policy("test", "policy-1", "foo", "*.example.com");

        let processed = process_one(policy, &config_maps);
        assert!(!processed.valid);
        assert!(processed.conditions[0].message.contains("invalid hostname"));
    }

    #[test]
    fn a_full_ancestor_list_ignores_the_policy() {
        let config_maps: HashMap<_, _> = [ca_config_map("test", "configmap-1")].into_iter().collect();

        let (_, mut policy) = backend_tls_policy("test", "policy-1", "foo", "foo.example.com");
        policy.status = Some(gw::PolicyStatus {
            ancestors: (0..POLICY_ANCESTOR_LIMIT)
                .map(|i| gw::PolicyAncestorStatus {
                    ancestor_ref: gw::ParentReference {
                        namespace: Some("other".to_string()),
                        name: format!("gateway-{i}"),
                        ..Default::default()
                    },
                    controller_name: "someone.else/controller".to_string(),
                    conditions: vec![],
                })
                .collect(),
        });

        let processed = process_one(policy, &config_maps);
        assert!(processed.ignored);
        assert!(!processed.valid);

        // With this controller already among the ancestors, the policy is
        // processed normally.
        let (_, mut policy) = backend_tls_policy("test", "policy-1", "foo", "foo.example.com");
        let mut ancestors: Vec<gw::PolicyAncestorStatus> = (0..POLICY_ANCESTOR_LIMIT - 1)
            .map(|i| gw::PolicyAncestorStatus {
                ancestor_ref: gw::ParentReference {
                    namespace: Some("other".to_string()),
                    name: format!("gateway-{i}"),
                    ..Default::default()
                },
                controller_name: "someone.else/controller".to_string(),
                conditions: vec![],
            })
            .collect();
        ancestors.push(gw::PolicyAncestorStatus {
            ancestor_ref: gw::ParentReference {
                namespace: Some("test".to_string()),
                name: "gateway-1".to_string(),
                ..Default::default()
            },
            controller_name: "my.controller/nginx-gateway".to_string(),
            conditions: vec![],
        });
        policy.status = Some(gw::PolicyStatus { ancestors });

        let processed = process_one(policy, &config_maps);
        assert!(!processed.ignored);
        assert!(processed.valid, "{:?}", processed.conditions);
    }

    #[test]
    fn target_service_defaults_to_the_policy_namespace() {
        let (_, policy) = backend_tls_policy("test", "policy-1", "foo", "foo.example.com");
        let node = BackendTlsPolicy {
            source: policy,
            ca_cert_ref: None,
            gateway: ResourceId::new("test", "gateway-1"),
            conditions: vec![],
            valid: true,
            is_referenced: false,
            ignored: false,
        };
        assert_eq!(node.target_service(), ResourceId::new("test", "foo"));
    }

    #[test]
    fn policies_are_skipped_without_a_gateway() {
        let policies: HashMap<_, _> =
            [backend_tls_policy("test", "policy-1", "foo", "foo.example.com")]
                .into_iter()
                .collect();
        let config_maps = HashMap::new();
        let mut resolver = ConfigMapResolver::new(&config_maps);

        let processed = process_backend_tls_policies(
            &policies,
            &mut resolver,
            "my.controller/nginx-gateway",
            None,
        );
        assert!(processed.is_empty());
    }
}
