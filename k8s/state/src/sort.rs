//! Deterministic ordering helpers for Kubernetes objects.

use nginx_gateway_controller_k8s_api::ObjectMeta;
use std::cmp::Ordering;

/// Orders object metadata by creation timestamp, oldest first, breaking ties
/// lexicographically on `{namespace}/{name}`.
pub fn cmp_object_meta(a: &ObjectMeta, b: &ObjectMeta) -> Ordering {
    let a_time = a.creation_timestamp.as_ref().map(|t| t.0);
    let b_time = b.creation_timestamp.as_ref().map(|t| t.0);

    a_time
        .cmp(&b_time)
        .then_with(|| namespaced_name(a).cmp(&namespaced_name(b)))
}

/// Returns whether `a` sorts before `b` under [`cmp_object_meta`].
pub fn less_object_meta(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    cmp_object_meta(a, b) == Ordering::Less
}

fn namespaced_name(meta: &ObjectMeta) -> (String, String) {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginx_gateway_controller_k8s_api::Time;

    fn meta(ns: &str, name: &str, created: i64) -> ObjectMeta {
        ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            creation_timestamp: Some(Time(
                chrono::DateTime::from_timestamp(created, 0).unwrap(),
            )),
            ..Default::default()
        }
    }

    #[test]
    fn older_objects_sort_first() {
        assert!(less_object_meta(
            &meta("test", "new-name", 100),
            &meta("test", "old-name", 200),
        ));
    }

    #[test]
    fn timestamp_ties_break_on_namespaced_name() {
        assert!(less_object_meta(
            &meta("test", "a", 100),
            &meta("test", "b", 100),
        ));
        assert!(less_object_meta(
            &meta("a-ns", "z", 100),
            &meta("b-ns", "a", 100),
        ));
    }
}
