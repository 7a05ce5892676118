use netmirror_k8s_api::Node;
use tokio::sync::watch;

/// The address of the node this process runs on.
///
/// The address is supplied externally, either statically or once the local Node has been
/// observed. Readers that must not run before it is known wait on [`LocalNode::ready`].
#[derive(Clone, Debug)]
pub struct LocalNode {
    tx: watch::Sender<Option<String>>,
    rx: watch::Receiver<Option<String>>,
}

// === impl LocalNode ===

impl LocalNode {
    /// Returns a provider whose address is not yet known.
    pub fn pending() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx, rx }
    }

    pub fn from_ip(ip: impl Into<String>) -> Self {
        let node = Self::pending();
        node.set_ip(ip);
        node
    }

    pub fn set_ip(&self, ip: impl Into<String>) {
        let ip = ip.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(ip.as_str()) {
                return false;
            }
            tracing::info!(%ip, "Local node address");
            *current = Some(ip);
            true
        });
    }

    /// Records the local node's address from its status, returning false if it reports no
    /// internal address.
    pub fn observe(&self, node: &Node) -> bool {
        match internal_ip(node) {
            Some(ip) => {
                self.set_ip(ip);
                true
            }
            None => false,
        }
    }

    pub fn ip(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Waits until the address is known.
    pub async fn ready(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            if let Some(ip) = rx.borrow_and_update().clone() {
                return ip;
            }
            // The sender is owned by `self`, so the channel cannot close while we wait.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for LocalNode {
    fn default() -> Self {
        Self::pending()
    }
}

fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .iter()
        .flatten()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};
    use std::time::Duration;

    #[tokio::test]
    async fn ready_waits_for_address() {
        let node = LocalNode::pending();
        assert_eq!(node.ip(), None);

        let waiter = tokio::spawn({
            let node = node.clone();
            async move { node.ready().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        node.set_ip("10.0.0.5");
        assert_eq!(waiter.await.unwrap(), "10.0.0.5");
        assert!(node.is_ready());
    }

    #[test]
    fn observes_internal_ip() {
        let node = LocalNode::pending();
        let mut obj = Node::default();
        assert!(!node.observe(&obj));

        obj.status = Some(NodeStatus {
            addresses: Some(vec![
                NodeAddress {
                    type_: "ExternalIP".to_string(),
                    address: "203.0.113.9".to_string(),
                },
                NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: "10.0.0.5".to_string(),
                },
            ]),
            ..Default::default()
        });
        assert!(node.observe(&obj));
        assert_eq!(node.ip().as_deref(), Some("10.0.0.5"));
    }
}
