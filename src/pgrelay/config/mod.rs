mod cluster;
mod enums;

pub use cluster::{ClusterConfig, NodeConfig, RedirectRuleConfig};
pub use enums::TlsMode;
