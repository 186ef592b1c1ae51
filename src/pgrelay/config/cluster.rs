use serde::Deserialize;

use crate::pgrelay::common::{Error, Result};
use crate::pgrelay::config::enums::TlsMode;

/// One backend node as it appears in the static config tree. Combined at
/// runtime with validity/role flags from the cluster manager to produce a
/// `cluster::BackendNodeView` (see `cluster.rs`) -- this type only knows
/// what's on disk, not which node is currently up or primary.
#[derive(Deserialize, Clone, Debug)]
pub struct NodeConfig {
    /// host to connect to. A leading `/` means a Unix domain socket directory.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// routing weight, see balance::select_node. 0 excludes the node from load-balanced traffic.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub backend_tls: TlsMode,
}

fn default_port() -> u16 {
    5432
}
const fn default_weight() -> f64 {
    1.0
}

impl NodeConfig {
    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }

    fn load(&mut self, defaults: &NodeConfig) -> Result<()> {
        if self.user.is_empty() {
            self.user = defaults.user.clone();
        }
        if self.database.is_empty() {
            self.database = defaults.database.clone();
        }
        if self.password.is_none() {
            self.password = defaults.password.clone();
        }
        if let TlsMode::Invalid = self.backend_tls {
            self.backend_tls = defaults.backend_tls;
        }
        if self.user.is_empty() {
            return Err(Error::new("node is missing a user"));
        }
        if self.database.is_empty() {
            return Err(Error::new("node is missing a database"));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: String::new(),
            port: default_port(),
            weight: default_weight(),
            user: String::new(),
            database: String::new(),
            password: None,
            backend_tls: TlsMode::Invalid,
        }
    }
}

/// A single entry of a `redirect_dbnames` / `redirect_app_names` list. Compiled
/// into a `balance::redirect::RedirectRule` once at config-load time -- we
/// don't want to recompile the regex on every `select_node` call.
#[derive(Deserialize, Clone, Debug)]
pub struct RedirectRuleConfig {
    pub pattern: String,
    pub target: String,
    #[serde(default = "default_rule_weight")]
    pub weight: f64,
}

const fn default_rule_weight() -> f64 {
    1.0
}

/// The static description of a streaming-replication cluster: the node table
/// plus database-name/application-name redirect lists. `NUM_BACKENDS` from
/// the spec is simply `nodes.len()`.
#[derive(Deserialize, Debug)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeConfig>,
    /// default values used to fill in any empty/omitted field of each node.
    #[serde(default)]
    pub default: NodeConfig,
    #[serde(default)]
    pub streaming_replication_mode: bool,
    #[serde(default)]
    pub redirect_dbnames: Option<Vec<RedirectRuleConfig>>,
    #[serde(default)]
    pub redirect_app_names: Option<Vec<RedirectRuleConfig>>,
}

impl ClusterConfig {
    pub fn load(&mut self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::new("cluster config must list at least one node"));
        }
        for node in &mut self.nodes {
            node.load(&self.default)?;
        }
        Ok(())
    }
}
