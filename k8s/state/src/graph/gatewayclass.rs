use crate::conditions::{self, Condition};
use ahash::AHashMap as HashMap;
use nginx_gateway_controller_core::ResourceId;
use nginx_gateway_controller_k8s_api::{
    gateway as gw, ObjectMeta, ResourceExt, BUNDLE_VERSION_ANNOTATION,
};

/// The Gateway API bundle version these CRDs are validated against.
pub const SUPPORTED_BUNDLE_VERSION: &str = "v1.0.0";

/// The winning GatewayClass with its validation outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayClass {
    pub source: gw::GatewayClass,
    pub conditions: Vec<Condition>,
    pub valid: bool,
}

pub(crate) struct ProcessedGatewayClasses {
    pub winner: Option<gw::GatewayClass>,
    pub ignored: HashMap<ResourceId, gw::GatewayClass>,
}

/// Separates the classes naming this controller into the winner (the class
/// named on the command line) and the ignored rest. The second return says
/// whether the configured class exists at all, whichever controller it
/// names.
pub(crate) fn process_gateway_classes(
    classes: &HashMap<ResourceId, gw::GatewayClass>,
    gc_name: &str,
    controller_name: &str,
) -> (ProcessedGatewayClasses, bool) {
    let mut processed = ProcessedGatewayClasses {
        winner: None,
        ignored: HashMap::new(),
    };

    let mut gc_exists = false;
    for (id, gc) in classes {
        if gc.name_unchecked() == gc_name {
            gc_exists = true;
            if gc.spec.controller_name == controller_name {
                processed.winner = Some(gc.clone());
            }
        } else if gc.spec.controller_name == controller_name {
            processed.ignored.insert(id.clone(), gc.clone());
        }
    }

    (processed, gc_exists)
}

pub(crate) fn build_gateway_class(
    gc: gw::GatewayClass,
    crd_metadata: &HashMap<ResourceId, ObjectMeta>,
) -> GatewayClass {
    let (conditions, valid) = validate_gateway_class(&gc, crd_metadata);
    GatewayClass {
        source: gc,
        conditions,
        valid,
    }
}

fn validate_gateway_class(
    gc: &gw::GatewayClass,
    crd_metadata: &HashMap<ResourceId, ObjectMeta>,
) -> (Vec<Condition>, bool) {
    let mut conds = Vec::new();
    let mut valid = true;

    if gc.spec.parameters_ref.is_some() {
        conds.push(conditions::new_gateway_class_invalid_parameters(
            "spec.parametersRef: Forbidden: parametersRef is not supported",
        ));
        valid = false;
    }

    let (version_conds, versions_valid) = validate_crd_versions(crd_metadata);
    conds.extend(version_conds);

    (conds, valid && versions_valid)
}

/// Validates the bundle-version annotation on the watched Gateway API CRDs.
///
/// A supported major version with an unexpected minor/patch keeps the class
/// usable on a best-effort basis; a missing or unparseable annotation, or
/// another major version, invalidates it.
fn validate_crd_versions(
    crd_metadata: &HashMap<ResourceId, ObjectMeta>,
) -> (Vec<Condition>, bool) {
    let mut conds = Vec::new();
    let mut valid = true;

    // Sorted so that the condition order does not depend on map iteration.
    let mut sorted: Vec<_> = crd_metadata.iter().collect();
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (id, metadata) in sorted {
        let version = metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(BUNDLE_VERSION_ANNOTATION));

        let Some(version) = version else {
            conds.push(conditions::new_gateway_class_unsupported_version(format!(
                "{id} does not carry the {BUNDLE_VERSION_ANNOTATION} annotation; \
                 supported version is {SUPPORTED_BUNDLE_VERSION}"
            )));
            valid = false;
            continue;
        };

        if version == SUPPORTED_BUNDLE_VERSION {
            continue;
        }

        if same_major_version(version, SUPPORTED_BUNDLE_VERSION) {
            // Best effort: report the mismatch but keep using the class.
            conds.push(conditions::new_gateway_class_unsupported_version(format!(
                "{id} has bundle version {version}; supported version is \
                 {SUPPORTED_BUNDLE_VERSION}, continuing on a best effort basis"
            )));
        } else {
            conds.push(conditions::new_gateway_class_unsupported_version(format!(
                "{id} has unsupported bundle version {version}; supported version is \
                 {SUPPORTED_BUNDLE_VERSION}"
            )));
            valid = false;
        }
    }

    (conds, valid)
}

fn same_major_version(v1: &str, v2: &str) -> bool {
    fn major(v: &str) -> Option<&str> {
        v.strip_prefix('v')?.split('.').next()
    }
    matches!((major(v1), major(v2)), (Some(a), Some(b)) if a == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ConditionStatus;
    use crate::test_util::gateway_class;

    const CTLR: &str = "my.controller/nginx-gateway";

    fn classes(
        entries: Vec<gw::GatewayClass>,
    ) -> HashMap<ResourceId, gw::GatewayClass> {
        entries
            .into_iter()
            .map(|gc| (ResourceId::cluster_scoped(gc.name_unchecked()), gc))
            .collect()
    }

    #[test]
    fn the_configured_class_wins_and_the_rest_are_ignored() {
        let classes = classes(vec![
            gateway_class("test-class", CTLR),
            gateway_class("other-class", CTLR),
            gateway_class("foreign-class", "someone.else/controller"),
        ]);

        let (processed, exists) = process_gateway_classes(&classes, "test-class", CTLR);

        assert!(exists);
        assert_eq!(
            processed.winner.as_ref().map(|gc| gc.name_unchecked()),
            Some("test-class".to_string())
        );
        // The foreign class is neither won nor ignored.
        assert_eq!(processed.ignored.len(), 1);
        assert!(processed
            .ignored
            .contains_key(&ResourceId::cluster_scoped("other-class")));
    }

    #[test]
    fn a_class_for_another_controller_produces_no_winner() {
        let classes = classes(vec![gateway_class("test-class", "someone.else/controller")]);

        let (processed, exists) = process_gateway_classes(&classes, "test-class", CTLR);

        assert!(exists);
        assert!(processed.winner.is_none());
    }

    #[test]
    fn a_missing_class_reports_not_exists() {
        let (processed, exists) = process_gateway_classes(&HashMap::new(), "test-class", CTLR);
        assert!(!exists);
        assert!(processed.winner.is_none());
    }

    #[test]
    fn parameters_ref_invalidates_the_class() {
        let mut gc = gateway_class("test-class", CTLR);
        gc.spec.parameters_ref = Some(gw::ParametersReference {
            group: "example.com".to_string(),
            kind: "Config".to_string(),
            name: "params".to_string(),
            namespace: None,
        });

        let built = build_gateway_class(gc, &HashMap::new());

        assert!(!built.valid);
        assert_eq!(built.conditions.len(), 1);
        assert_eq!(built.conditions[0].reason, "InvalidParameters");
    }

    #[test]
    fn crd_version_gate() {
        let crd = |version: Option<&str>| -> HashMap<ResourceId, ObjectMeta> {
            let mut metadata = ObjectMeta {
                name: Some("gateways.gateway.networking.k8s.io".to_string()),
                ..Default::default()
            };
            if let Some(v) = version {
                metadata.annotations = Some(
                    [(BUNDLE_VERSION_ANNOTATION.to_string(), v.to_string())]
                        .into_iter()
                        .collect(),
                );
            }
            [(
                ResourceId::cluster_scoped("gateways.gateway.networking.k8s.io"),
                metadata,
            )]
            .into_iter()
            .collect()
        };

        // Exactly supported: no conditions, valid.
        let (conds, valid) = validate_crd_versions(&crd(Some("v1.0.0")));
        assert!(conds.is_empty());
        assert!(valid);

        // Same major: best-effort condition, still valid.
        let (conds, valid) = validate_crd_versions(&crd(Some("v1.1.0")));
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].status, ConditionStatus::False);
        assert!(valid);

        // Other major: invalid.
        let (_, valid) = validate_crd_versions(&crd(Some("v2.0.0")));
        assert!(!valid);

        // Missing annotation: invalid.
        let (_, valid) = validate_crd_versions(&crd(None));
        assert!(!valid);
    }
}
