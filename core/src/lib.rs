//! Dataplane-neutral types for the NGINX gateway controller.
//!
//! This crate holds the intermediate representation that the state crate
//! lowers the Gateway API graph into, along with the seams that connect the
//! control loop to the outside world: endpoint resolution and configuration
//! generation. Nothing in here depends on Kubernetes client machinery, so the
//! IR can be constructed and compared in plain unit tests.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod dataplane;
pub mod resolve;

pub use self::resolve::{Endpoint, ServiceResolver};

use std::fmt;

/// Identifies a namespaced resource by `namespace` and `name`.
///
/// Cluster-scoped resources use an empty namespace.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Builds an id for a cluster-scoped resource.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            return f.write_str(&self.name);
        }
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
