//! The intermediate representation handed to the NGINX configuration
//! generator.
//!
//! All sequences are deterministically ordered by the builder, and all types
//! implement structural equality so that a rebuild from an unchanged cluster
//! snapshot compares equal to its predecessor.

use crate::{resolve::Endpoint, ResourceId};
use std::collections::BTreeMap;

/// Id of an SSL keypair in [`Configuration::ssl_key_pairs`].
pub type SslKeyPairId = String;

/// Id of a CA certificate bundle in [`Configuration::cert_bundles`].
pub type CertBundleId = String;

/// The hostname of the catch-all SSL server; matches any name that no other
/// server on the port matches.
pub const WILDCARD_HOSTNAME: &str = "~^";

/// Path to the system CA bundle used when a backend TLS policy specifies
/// well-known root certificates.
pub const SYSTEM_ROOT_CA_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

/// A complete dataplane configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Plaintext virtual servers, default servers first per port.
    pub http_servers: Vec<VirtualServer>,
    /// TLS-terminating virtual servers.
    pub ssl_servers: Vec<VirtualServer>,
    /// Upstreams, sorted by name.
    pub upstreams: Vec<Upstream>,
    /// Backend groups referenced by the servers, deduplicated.
    pub backend_groups: Vec<BackendGroup>,
    /// TLS keypairs keyed by `ssl_keypair_<ns>_<name>`.
    pub ssl_key_pairs: BTreeMap<SslKeyPairId, SslKeyPair>,
    /// CA bundles keyed by `cert_bundle_<ns>_<name>`.
    pub cert_bundles: BTreeMap<CertBundleId, CertBundle>,
    /// Monotonically increasing generation, bumped by the orchestrator.
    pub version: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualServer {
    /// The default server accepts traffic for hostnames no other server on
    /// the port matches. It has no hostname and no path rules.
    pub is_default: bool,
    pub hostname: String,
    pub ssl: Option<Ssl>,
    pub port: i32,
    pub path_rules: Vec<PathRule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ssl {
    pub key_pair_id: SslKeyPairId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathType {
    Exact,
    Prefix,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathRule {
    pub path: String,
    pub path_type: PathType,
    pub match_rules: Vec<MatchRule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRule {
    /// The route the rule came from, for observability.
    pub source: ResourceId,
    pub match_: RouteMatch,
    pub filters: HttpFilters,
    pub backend_group: BackendGroup,
}

/// The non-path portion of an HTTPRoute match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteMatch {
    pub method: Option<String>,
    pub headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderMatch {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryParamMatch {
    pub name: String,
    pub value: String,
}

/// Filters of a rule, coalesced: the first redirect wins, the first rewrite
/// wins, and header modifiers merge in order with first-wins per header name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpFilters {
    pub request_redirect: Option<RequestRedirectFilter>,
    pub url_rewrite: Option<UrlRewriteFilter>,
    pub request_header_modifier: Option<HeaderModifierFilter>,
    /// Set when the rule carried a filter the dataplane cannot express; such
    /// a rule answers every request with a 500.
    pub invalid: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestRedirectFilter {
    pub scheme: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<i32>,
    pub status_code: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlRewriteFilter {
    pub hostname: Option<String>,
    pub path: Option<PathModifier>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathModifier {
    ReplaceFullPath(String),
    ReplacePrefixMatch(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderModifierFilter {
    pub set: Vec<HttpHeader>,
    pub add: Vec<HttpHeader>,
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// The backends of one route rule.
///
/// Identified by the route key and the rule's index within the route, which
/// is what makes deduplication across servers possible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendGroup {
    pub source: ResourceId,
    pub rule_idx: usize,
    pub backends: Vec<Backend>,
}

impl BackendGroup {
    /// A name unique among all backend groups, usable as an NGINX variable
    /// name fragment.
    pub fn name(&self) -> String {
        format!(
            "group_{}__{}_rule{}",
            self.source.namespace, self.source.name, self.rule_idx
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backend {
    pub upstream_name: String,
    pub weight: i32,
    /// Invalid backends answer with a 502 instead of proxying.
    pub valid: bool,
    pub verify_tls: Option<VerifyTls>,
}

/// TLS verification attached to a backend by a BackendTLSPolicy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyTls {
    /// Bundle to verify against; `None` means the system root store at
    /// [`SYSTEM_ROOT_CA_PATH`].
    pub cert_bundle_id: Option<CertBundleId>,
    pub hostname: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Upstream {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
    /// Set when endpoint resolution failed; the upstream is kept so the
    /// dataplane can answer with a 500 rather than an undefined variable.
    pub error_msg: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SslKeyPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertBundle {
    pub cert: Vec<u8>,
}

/// Returns the keypair id for a referenced TLS secret.
pub fn ssl_key_pair_id(secret: &ResourceId) -> SslKeyPairId {
    format!("ssl_keypair_{}_{}", secret.namespace, secret.name)
}

/// Returns the bundle id for a referenced CA certificate ConfigMap.
pub fn cert_bundle_id(config_map: &ResourceId) -> CertBundleId {
    format!("cert_bundle_{}_{}", config_map.namespace, config_map.name)
}

/// Returns the upstream name for a service port.
pub fn upstream_name(service: &ResourceId, port: i32) -> String {
    format!("{}_{}_{}", service.namespace, service.name, port)
}

/// Generates NGINX configuration bytes from the IR.
///
/// The orchestrator hands every accepted [`Configuration`] to a generator and
/// does not interpret the result.
pub trait Generator: Send + Sync {
    fn generate(&self, configuration: &Configuration) -> Vec<u8>;
}
