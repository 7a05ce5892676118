use crate::{
    core::Repository,
    node,
    policy::{PolicyMetrics, Reconciler, SyncProgress, Watcher},
    resource::{self, ClusterCapabilities, LocalNode, MirrorMetrics, ResourceParams},
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::{future, prelude::*};
use prometheus_client::registry::Registry;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "netmirror", about = "Mirrors cluster resources and reconciles network policies")]
pub struct Args {
    #[clap(long, default_value = "netmirror=info,warn", env = "NETMIRROR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Prefer EndpointSlices over Endpoints when the cluster serves them.
    #[clap(
        long,
        default_value = "true",
        action = clap::ArgAction::Set,
        env = "NETMIRROR_ENABLE_K8S_ENDPOINT_SLICE"
    )]
    enable_k8s_endpoint_slice: bool,

    /// Only mirror services labeled with this service-proxy-name. When empty, only services
    /// without the label are mirrored.
    #[clap(long, default_value = "")]
    k8s_service_proxy_name: String,

    /// Bounds the duration of list requests. Zero leaves them unbounded.
    #[clap(long, default_value = "0")]
    k8s_list_timeout_seconds: u32,

    /// The node this process runs on.
    #[clap(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// The address of the local node. Overrides discovery through `--node-name`.
    #[clap(long)]
    node_ip: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            enable_k8s_endpoint_slice,
            k8s_service_proxy_name,
            k8s_list_timeout_seconds,
            node_name,
            node_ip,
        } = self;

        let config = resource::Config {
            enable_endpoint_slice: enable_k8s_endpoint_slice,
            service_proxy_name: k8s_service_proxy_name,
            list_timeout_seconds: k8s_list_timeout_seconds,
        };

        let mut prom = <Registry>::default();
        let mirror_metrics = MirrorMetrics::register(prom.sub_registry_with_prefix("mirror"));
        let policy_metrics = PolicyMetrics::register(&mut prom);
        let sync_progress = SyncProgress::register(&mut prom);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();

        // Endpoints negotiate their format on first use, so a failed detection only means that the
        // baseline format is chosen.
        let caps = ClusterCapabilities::new();
        if let Err(error) = caps.detect(&client).await {
            warn!(%error, "Failed to detect cluster capabilities");
        }

        let local_node = match (node_ip, node_name) {
            (Some(ip), _) => LocalNode::from_ip(ip),
            (None, Some(name)) => {
                let local = LocalNode::pending();
                tokio::spawn(node::discover(client.clone(), name, local.clone()));
                local
            }
            (None, None) => bail!("one of --node-ip or --node-name must be set"),
        };

        let params = ResourceParams::new(client, config).with_metrics(mirror_metrics);

        // Spawn resource watches.

        spawn_mirror(resource::service_resource(&params)?, "services");
        spawn_mirror(resource::endpoints_resource(&params, caps)?, "endpoints");
        spawn_mirror(resource::node_resource(&params), "nodes");
        spawn_mirror(resource::namespace_resource(&params), "namespaces");
        spawn_mirror(resource::pod_resource(&params), "pods");
        spawn_mirror(
            resource::workload_endpoint_resource(&params, &local_node),
            "workloadendpoints",
        );
        spawn_mirror(
            resource::workload_endpoint_slice_resource(&params, &local_node),
            "workloadendpointslices",
        );

        // Reconcile NetworkPolicies into the engine.
        let engine = Repository::shared();
        let watcher = Watcher::new(Reconciler::new(engine, policy_metrics, sync_progress));
        // NetworkPolicies are mirrored as received, so none are ever evicted.
        let policies = resource::network_policy_resource(&params)
            .stream()
            .filter_map(|change| future::ready(change.into_event()));
        tokio::spawn(
            watcher
                .run(policies.boxed())
                .instrument(info_span!("networkpolicies")),
        );

        info!("Started");

        // Block the main thread on the shutdown signal. Spawned tasks are not drained; they are
        // dropped when the process exits.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn spawn_mirror<K, T>(resource: resource::Resource<K, T>, name: &'static str)
where
    K: std::fmt::Debug + Send + 'static,
    T: kube::Resource + Clone + Send + Sync + 'static,
{
    let store = resource.store();
    tokio::spawn(resource.run(store).instrument(info_span!("mirror", resource = name)));
}
