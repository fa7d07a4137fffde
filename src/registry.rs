//! Cluster-to-node registry.
//!
//! Holds the dispatch table consulted by both the HTTP invoke path and the
//! inbound broker dispatcher. The reserved `"system"` cluster is populated
//! at construction and cannot be replaced.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::address::Address;
use crate::ledger::DeliveryLedger;
use crate::node::{InvokeContext, Node, NodeError, SystemNode};

/// Reserved cluster id owned by the built-in system node.
pub const SYSTEM_CLUSTER: &str = "system";

pub(crate) type NodeMap = HashMap<String, Arc<dyn Node>>;

/// Errors from registration and synchronous invocation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Cluster with name \"system\" cannot be registered")]
    ReservedCluster,

    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Mapping from cluster id to its dispatch target.
pub struct NodeRegistry {
    endpoint_id: String,
    nodes: Arc<RwLock<NodeMap>>,
}

impl NodeRegistry {
    /// Create a registry for this endpoint, seeding the system node.
    pub fn new(endpoint_id: impl Into<String>, ledger: Arc<DeliveryLedger>) -> Self {
        let endpoint_id = endpoint_id.into();
        let nodes: Arc<RwLock<NodeMap>> = Arc::new(RwLock::new(HashMap::new()));
        let system = SystemNode::new(&endpoint_id, Arc::downgrade(&nodes), ledger);
        nodes
            .write()
            .expect("node map lock")
            .insert(SYSTEM_CLUSTER.to_string(), Arc::new(system));
        Self { endpoint_id, nodes }
    }

    /// Register a node under a cluster id.
    ///
    /// Registration is idempotent: the first writer wins and duplicates are
    /// logged and ignored. The `"system"` cluster is reserved.
    pub fn register(&self, cluster_id: &str, node: Arc<dyn Node>) -> Result<(), RegistryError> {
        if cluster_id == SYSTEM_CLUSTER {
            return Err(RegistryError::ReservedCluster);
        }
        let mut nodes = self.nodes.write().expect("node map lock");
        if nodes.contains_key(cluster_id) {
            warn!(cluster_id = %cluster_id, "Cluster already registered, ignoring");
            return Ok(());
        }
        info!(cluster_id = %cluster_id, "Registering cluster");
        nodes.insert(cluster_id.to_string(), node);
        Ok(())
    }

    pub fn resolve(&self, cluster_id: &str) -> Option<Arc<dyn Node>> {
        self.nodes
            .read()
            .expect("node map lock")
            .get(cluster_id)
            .cloned()
    }

    /// Synchronous invoke path used by the ingress bridge.
    pub async fn invoke(
        &self,
        cluster_id: &str,
        app_id: &str,
        ctx: InvokeContext,
        message: serde_json::Value,
    ) -> Result<serde_json::Value, RegistryError> {
        let node = self
            .resolve(cluster_id)
            .ok_or_else(|| RegistryError::UnknownCluster(cluster_id.to_string()))?;
        Ok(node.invoke(app_id, ctx, message).await?)
    }

    /// Every currently invocable address on this endpoint.
    pub fn routes(&self) -> Vec<String> {
        collect_routes(&self.endpoint_id, &self.nodes.read().expect("node map lock"))
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }
}

/// Enumerate serialized addresses for every public app of every node.
pub(crate) fn collect_routes(endpoint_id: &str, nodes: &NodeMap) -> Vec<String> {
    let mut clusters: Vec<&String> = nodes.keys().collect();
    clusters.sort();

    let mut routes = Vec::new();
    for cluster_id in clusters {
        let node = &nodes[cluster_id];
        for app_id in node.apps() {
            match Address::new(endpoint_id, cluster_id.as_str(), app_id) {
                Ok(addr) => routes.push(addr.to_string()),
                Err(e) => warn!(cluster_id = %cluster_id, error = %e, "Skipping unroutable app"),
            }
        }
    }
    routes
}
