use crate::{k8s::Node, resource::LocalNode};
use kube::api::Api;
use tokio::time;
use tracing::{debug, warn};

const RETRY: time::Duration = time::Duration::from_secs(1);

/// Reads the named Node until it reports an InternalIP, then records it as the local node's
/// address.
#[tracing::instrument(skip(client, local), fields(node = %name))]
pub(crate) async fn discover(client: kube::Client, name: String, local: LocalNode) {
    let api = Api::<Node>::all(client);
    loop {
        match api.get(&name).await {
            Ok(node) if local.observe(&node) => return,
            Ok(_) => debug!("Node has no InternalIP"),
            Err(error) => warn!(%error, "Failed to get node"),
        }
        time::sleep(RETRY).await;
    }
}
