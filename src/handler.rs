//! The event handler drives the reconcile loop: it owns the change
//! processor, rebuilds the dataplane configuration when processing reports a
//! change, hands the configuration to NGINX, and forwards status updates to
//! the writer.

use crate::{nginx::NginxConfigurer, status_writer::StatusWriter};
use nginx_gateway_controller_core::{dataplane::Configuration, ServiceResolver};
use nginx_gateway_controller_k8s_api::Time;
use nginx_gateway_controller_k8s_state::{
    change::{ChangeProcessor, ChangeType, Delete, Upsert},
    dataplane, ControllerConfig,
};
use nginx_gateway_controller_k8s_status as status;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

pub type SharedHandler = Arc<EventHandler>;

pub struct EventHandler {
    /// Serializes captures with processing. Rebuilds run outside this lock;
    /// captures that arrive during a rebuild land in the next process call.
    processor: Mutex<ChangeProcessor>,
    notify: Notify,
    update_gatewayclass_status: bool,
}

impl EventHandler {
    pub fn new(config: ControllerConfig, update_gatewayclass_status: bool) -> SharedHandler {
        Arc::new(Self {
            processor: Mutex::new(ChangeProcessor::new(config)),
            notify: Notify::new(),
            update_gatewayclass_status,
        })
    }

    pub fn capture_upsert(&self, upsert: Upsert) {
        self.processor.lock().capture_upsert(upsert);
        self.notify.notify_one();
    }

    pub fn capture_delete(&self, delete: Delete) {
        self.processor.lock().capture_delete(delete);
        self.notify.notify_one();
    }

    /// Processes captures until shutdown. At most one reconcile runs at a
    /// time; captures observed before a process call are all reflected in
    /// its output.
    pub async fn run(
        self: Arc<Self>,
        resolver: Arc<dyn ServiceResolver>,
        configurer: Arc<dyn NginxConfigurer>,
        writer: StatusWriter,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut configuration = Configuration::default();

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {
                    info!("shutting down the event handler");
                    return;
                }
            }

            // Cancellation aborts the in-flight reconcile; the configuration
            // is only mutated after each await completes, so an aborted
            // reconcile leaves the previous state intact.
            tokio::select! {
                _ = self.process(&mut configuration, resolver.as_ref(), &*configurer, &writer) => {}
                _ = shutdown.changed() => {
                    info!("shutting down the event handler");
                    return;
                }
            }
        }
    }

    async fn process(
        &self,
        configuration: &mut Configuration,
        resolver: &dyn ServiceResolver,
        configurer: &dyn NginxConfigurer,
        writer: &StatusWriter,
    ) {
        // The processor lock is held only to consume the pending flags and
        // rebuild the graph; endpoint resolution and the NGINX reload happen
        // outside it.
        let (change, graph, controller_name) = {
            let mut processor = self.processor.lock();
            let (change, graph) = processor.process();
            (change, graph, processor.config().controller_name.clone())
        };

        let graph = match (change, graph) {
            (ChangeType::NoChange, _) | (_, None) => {
                debug!("no change; nothing to do");
                return;
            }
            (_, Some(graph)) => graph,
        };

        match change {
            ChangeType::ClusterStateChange => {
                let version = configuration.version + 1;
                *configuration =
                    dataplane::build_configuration(&graph, resolver, version).await;
                info!(version, "rebuilt the dataplane configuration");
            }
            ChangeType::EndpointsOnlyChange => {
                configuration.upstreams = dataplane::build_upstreams(&graph, resolver).await;
                configuration.version += 1;
                info!(version = configuration.version, "re-resolved upstreams");
            }
            ChangeType::NoChange => unreachable!("handled above"),
        }

        let reload = configurer.apply(configuration).await;
        if let Some(reload_error) = &reload.error {
            error!(%reload_error, "failed to reload NGINX");
        }

        let transition_time = Time(chrono::Utc::now());
        let mut requests = status::prepare_route_requests(
            &graph.routes,
            &transition_time,
            &reload,
            &controller_name,
        );
        if self.update_gatewayclass_status {
            requests.extend(status::prepare_gateway_class_requests(
                graph.gateway_class.as_ref(),
                &graph.ignored_gateway_classes,
                &transition_time,
            ));
        }
        requests.extend(status::prepare_gateway_requests(
            graph.gateway.as_ref(),
            &graph.ignored_gateways,
            &transition_time,
            &[],
            &reload,
        ));
        requests.extend(status::prepare_backend_tls_policy_requests(
            &graph.backend_tls_policies,
            &transition_time,
            &controller_name,
        ));

        writer.apply(requests).await;
    }
}
