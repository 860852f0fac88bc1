#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use k8s_openapi::{
    api::coordination::v1::Lease,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::runtime::watcher;
use nginx_gateway_controller::{
    k8s, state::ControllerConfig, CaptureIndex, EndpointSliceResolver, EventHandler,
    FileSystemConfigurer, StatusWriter,
};
use nginx_gateway_controller_core::ResourceId;
use parking_lot::RwLock;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_GRACE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[clap(
    name = "nginx-gateway-controller",
    about = "A Kubernetes Gateway API controller for NGINX"
)]
struct Args {
    #[clap(long, default_value = "info", env = "NGINX_GATEWAY_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The identity this controller matches against GatewayClass
    /// controllerName fields, in `<domain>/<path>` form.
    #[clap(long)]
    gateway_ctlr_name: String,

    /// The GatewayClass this controller serves.
    #[clap(long)]
    gatewayclass: String,

    /// Serve only the given Gateway (`namespace/name`) instead of selecting
    /// a winner.
    #[clap(long)]
    gateway: Option<String>,

    /// Disable to stop writing GatewayClass statuses.
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    update_gatewayclass_status: bool,

    /// Port reserved for metrics; listeners may not bind it.
    #[clap(long, default_value_t = 9113)]
    metrics_port: u16,

    /// Port reserved for health probes; listeners may not bind it.
    #[clap(long, default_value_t = 8081)]
    health_port: u16,

    /// When set, every replica writes statuses.
    #[clap(long)]
    leader_election_disabled: bool,

    #[clap(long, default_value = "nginx-gateway-controller-leader-election")]
    leader_election_lock_name: String,

    /// Namespace holding the leader-election lease.
    #[clap(long, default_value = "nginx-gateway")]
    controller_namespace: String,

    #[clap(long, default_value = "/etc/nginx/conf.d/http.conf")]
    nginx_conf_path: PathBuf,

    #[clap(long, default_value = "/etc/nginx/secrets")]
    nginx_secrets_dir: PathBuf,

    /// Binary used to trigger `-s reload`; omit to skip reloads.
    #[clap(long)]
    nginx_binary: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    validate_controller_name(&args.gateway_ctlr_name)
        .context("invalid --gateway-ctlr-name")?;
    validate_resource_name(&args.gatewayclass).context("invalid --gatewayclass")?;
    if args.metrics_port == args.health_port {
        bail!(
            "--metrics-port and --health-port may not both be {}",
            args.metrics_port
        );
    }

    let gateway = args
        .gateway
        .as_deref()
        .map(parse_namespaced_name)
        .transpose()
        .context("invalid --gateway")?;

    let mut runtime = kubert::Runtime::builder()
        .with_log(args.log_level, args.log_format)
        .with_admin(args.admin)
        .with_client(args.client)
        .build()
        .await?;

    let config = ControllerConfig {
        controller_name: args.gateway_ctlr_name.clone(),
        gateway_class_name: args.gatewayclass.clone(),
        gateway,
        protected_ports: [
            (i32::from(args.metrics_port), "MetricsPort".to_string()),
            (i32::from(args.health_port), "HealthPort".to_string()),
        ]
        .into_iter()
        .collect(),
    };

    let handler = EventHandler::new(config, args.update_gatewayclass_status);
    let index = Arc::new(RwLock::new(CaptureIndex::new(handler.clone())));

    // Cluster-scoped watches.
    let gateway_classes = runtime.watch_all::<k8s::gateway::GatewayClass>(watcher::Config::default());
    tokio::spawn(
        kubert::index::cluster(index.clone(), gateway_classes)
            .instrument(info_span!("gatewayclasses")),
    );
    let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
    tokio::spawn(
        kubert::index::cluster(index.clone(), namespaces).instrument(info_span!("namespaces")),
    );
    let crds = runtime.watch_all::<CustomResourceDefinition>(watcher::Config::default());
    tokio::spawn(kubert::index::cluster(index.clone(), crds).instrument(info_span!("crds")));

    // Namespaced watches.
    let gateways = runtime.watch_all::<k8s::gateway::Gateway>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), gateways).instrument(info_span!("gateways")),
    );
    let http_routes = runtime.watch_all::<k8s::gateway::HTTPRoute>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), http_routes).instrument(info_span!("httproutes")),
    );
    let reference_grants =
        runtime.watch_all::<k8s::gateway::ReferenceGrant>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), reference_grants)
            .instrument(info_span!("referencegrants")),
    );
    let backend_tls_policies =
        runtime.watch_all::<k8s::gateway::BackendTLSPolicy>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), backend_tls_policies)
            .instrument(info_span!("backendtlspolicies")),
    );
    let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
    );
    let endpoint_slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), endpoint_slices)
            .instrument(info_span!("endpointslices")),
    );
    let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), secrets).instrument(info_span!("secrets")),
    );
    let config_maps = runtime.watch_all::<k8s::ConfigMap>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(index.clone(), config_maps).instrument(info_span!("configmaps")),
    );

    let identity = std::env::var("HOSTNAME")
        .unwrap_or_else(|_| "nginx-gateway-controller".to_string());

    // Without leader election, every replica writes statuses.
    let claims = if args.leader_election_disabled {
        None
    } else {
        let api = k8s::Api::<Lease>::namespaced(runtime.client(), &args.controller_namespace);
        let lease = kubert::lease::LeaseManager::init(api, &args.leader_election_lock_name).await?;
        let params = kubert::lease::ClaimParams {
            lease_duration: LEASE_DURATION,
            renew_grace_period: RENEW_GRACE_PERIOD,
        };
        let (claims, _task) = lease.spawn(identity.clone(), params).await?;
        Some(claims)
    };

    let writer = StatusWriter::new(runtime.client(), claims, identity);
    let resolver = Arc::new(EndpointSliceResolver::new(runtime.client()));
    let configurer = Arc::new(FileSystemConfigurer::new(
        args.nginx_conf_path,
        args.nginx_secrets_dir,
        args.nginx_binary,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(
        handler
            .clone()
            .run(resolver, configurer, writer, shutdown_rx)
            .instrument(info_span!("handler")),
    );

    info!(
        controller = %args.gateway_ctlr_name,
        gatewayclass = %args.gatewayclass,
        "controller running",
    );

    let result = runtime.run().await;
    let _ = shutdown_tx.send(true);
    if result.is_err() {
        bail!("aborted");
    }
    Ok(())
}

/// Controller names take the form `<domain>/<path>`, like
/// `gateway.nginx.org/nginx-gateway-controller`.
fn validate_controller_name(name: &str) -> Result<()> {
    let Some((domain, path)) = name.split_once('/') else {
        bail!("{name:?} must take the form <domain>/<path>");
    };
    validate_resource_name(domain).context("invalid domain")?;
    if !domain.contains('.') {
        bail!("domain {domain:?} must be a fully qualified domain name");
    }
    if path.is_empty() {
        bail!("the path following {domain}/ may not be empty");
    }
    Ok(())
}

/// DNS-1123 subdomain validation, used for the class name and the
/// controller-name domain.
fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 253 {
        bail!("{name:?} must be 1-253 characters");
    }
    for label in name.split('.') {
        if label.is_empty() {
            bail!("{name:?} contains an empty label");
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            bail!("{name:?} may contain only lower case alphanumeric characters or '-'");
        }
        if label.starts_with('-') || label.ends_with('-') {
            bail!("{name:?} labels must start and end with an alphanumeric character");
        }
    }
    Ok(())
}

fn parse_namespaced_name(value: &str) -> Result<ResourceId> {
    match value.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok(ResourceId::new(namespace, name))
        }
        _ => bail!("{value:?} must take the form <namespace>/<name>"),
    }
}
