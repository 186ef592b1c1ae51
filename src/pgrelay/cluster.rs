//! The read-only cluster view the load balancer and session builder consume.
//! Building and maintaining this view (liveness checks, failover, primary
//! promotion) belongs to the cluster manager/watchdog this crate does not
//! implement; we only define the shape it hands us, plus a convenience
//! constructor from a `config::ClusterConfig` for embedding binaries and tests.

use crate::pgrelay::config::{ClusterConfig, NodeConfig, TlsMode};

/// Where a backend lives: a TCP host:port, or a Unix socket directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
    pub is_unix_socket: bool,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let is_unix_socket = host.starts_with('/');
        BackendEndpoint { host, port, is_unix_socket }
    }
}

impl From<&NodeConfig> for BackendEndpoint {
    fn from(node: &NodeConfig) -> Self {
        BackendEndpoint::new(node.host.clone(), node.port)
    }
}

/// Login identity for a session. Immutable for the life of the session.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub database: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl From<&NodeConfig> for Credentials {
    fn from(node: &NodeConfig) -> Self {
        Credentials {
            user: node.user.clone(),
            database: node.database.clone(),
            password: node.password.clone(),
        }
    }
}

/// One node's liveness/eligibility as seen by the cluster manager, plus its
/// static address and routing weight.
#[derive(Clone, Debug)]
pub struct BackendNodeView {
    pub endpoint: BackendEndpoint,
    pub credentials: Credentials,
    pub backend_tls: TlsMode,
    pub weight: f64,
    /// Node is nominally up.
    pub valid_raw: bool,
    /// Node is up *and* allowed to serve the current session mode (e.g. a
    /// standby that's still catching up after promotion would be valid_raw
    /// but not valid).
    pub valid: bool,
}

/// A snapshot of the replication cluster, read-only from the balancer's point
/// of view. Not required to be re-read mid-selection (see CONCURRENCY notes).
#[derive(Clone, Debug)]
pub struct ClusterView {
    pub nodes: Vec<BackendNodeView>,
    /// -1 if there is currently no reachable primary.
    pub primary_node_id: i32,
    /// The "main" node, always defined; used as the safety-net fallback.
    pub master_node_id: i32,
    pub streaming_replication_mode: bool,
}

impl ClusterView {
    /// Build a view where every configured node is considered up and valid,
    /// node 0 is both primary and master. Useful for tests and for an
    /// embedding binary that hasn't wired up real liveness checks yet.
    pub fn from_config(config: &ClusterConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .map(|node| BackendNodeView {
                endpoint: node.into(),
                credentials: node.into(),
                backend_tls: node.backend_tls,
                weight: node.weight,
                valid_raw: true,
                valid: true,
            })
            .collect();
        ClusterView {
            nodes,
            primary_node_id: 0,
            master_node_id: 0,
            streaming_replication_mode: config.streaming_replication_mode,
        }
    }

    pub fn num_backends(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: i32) -> Option<&BackendNodeView> {
        if id < 0 {
            return None;
        }
        self.nodes.get(id as usize)
    }
}

/// Per-client routing hints the load balancer uses to match redirect rules.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    pub database: String,
    pub application_name: Option<String>,
}
