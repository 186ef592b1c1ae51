use regex::Regex;

use crate::pgrelay::cluster::ClusterView;
use crate::pgrelay::common::Result;
use crate::pgrelay::config::RedirectRuleConfig;

/// A compiled database-name or application-name redirect rule. Ordered;
/// first-match wins (see `RuleList::match_against`).
pub struct RedirectRule {
    pattern: Regex,
    pub target_token: String,
    pub weight: f64,
}

impl RedirectRule {
    pub fn compile(config: &RedirectRuleConfig) -> Result<Self> {
        Ok(RedirectRule {
            pattern: Regex::new(&config.pattern)?,
            target_token: config.target.clone(),
            weight: config.weight.clamp(0.0, 1.0),
        })
    }
}

/// An ordered list of redirect rules, as configured for `redirect_dbnames` or
/// `redirect_app_names`.
pub struct RuleList(Vec<RedirectRule>);

impl RuleList {
    pub fn compile(configs: &[RedirectRuleConfig]) -> Result<Self> {
        let rules = configs.iter().map(RedirectRule::compile).collect::<Result<Vec<_>>>()?;
        Ok(RuleList(rules))
    }

    /// Returns `(index, target_token, weight)` of the first rule whose pattern
    /// matches `value`, or `None` if no rule matches.
    pub fn match_against(&self, value: &str) -> Option<(usize, &str, f64)> {
        self.0
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.pattern.is_match(value))
            .map(|(i, rule)| (i, rule.target_token.as_str(), rule.weight))
    }
}

/// Resolve a symbolic node token against the current cluster view.
///
/// - `"primary"` resolves to `primary_node_id` if a primary is currently
///   known, else falls back to `master_node_id`.
/// - `"standby"` resolves to the sentinel `-1`, meaning "any standby, to be
///   picked by the balancer's weighted fallback draw".
/// - A numeric literal `n` resolves to `n` if `0 <= n < NUM_BACKENDS`, else
///   falls back to `master_node_id`.
pub fn resolve_token(token: &str, cluster: &ClusterView) -> i32 {
    match token {
        "primary" => {
            if cluster.primary_node_id >= 0 {
                cluster.primary_node_id
            } else {
                cluster.master_node_id
            }
        }
        "standby" => -1,
        _ => match token.parse::<i32>() {
            Ok(n) if n >= 0 && (n as usize) < cluster.num_backends() => n,
            _ => cluster.master_node_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgrelay::cluster::{BackendEndpoint, BackendNodeView, Credentials};
    use crate::pgrelay::config::TlsMode;

    fn view(primary: i32, master: i32, n: usize) -> ClusterView {
        let nodes = (0..n)
            .map(|_| BackendNodeView {
                endpoint: BackendEndpoint::new("localhost", 5432),
                credentials: Credentials { user: "u".into(), database: "d".into(), password: None },
                backend_tls: TlsMode::Disabled,
                weight: 1.0,
                valid_raw: true,
                valid: true,
            })
            .collect();
        ClusterView { nodes, primary_node_id: primary, master_node_id: master, streaming_replication_mode: true }
    }

    #[test]
    fn primary_token_resolves_to_known_primary() {
        let cluster = view(1, 0, 3);
        assert_eq!(resolve_token("primary", &cluster), 1);
    }

    #[test]
    fn primary_token_falls_back_to_master_when_unknown() {
        let cluster = view(-1, 0, 3);
        assert_eq!(resolve_token("primary", &cluster), 0);
    }

    #[test]
    fn standby_token_is_sentinel() {
        let cluster = view(0, 0, 3);
        assert_eq!(resolve_token("standby", &cluster), -1);
    }

    #[test]
    fn numeric_token_in_range_resolves_directly() {
        let cluster = view(0, 0, 3);
        assert_eq!(resolve_token("2", &cluster), 2);
    }

    #[test]
    fn numeric_token_out_of_range_falls_back_to_master() {
        let cluster = view(0, 0, 3);
        assert_eq!(resolve_token("7", &cluster), 0);
        assert_eq!(resolve_token("not-a-number", &cluster), 0);
    }

    #[test]
    fn rule_list_first_match_wins() {
        let configs = vec![
            RedirectRuleConfig { pattern: "^app_.*".into(), target: "1".into(), weight: 1.0 },
            RedirectRuleConfig { pattern: ".*".into(), target: "standby".into(), weight: 0.5 },
        ];
        let rules = RuleList::compile(&configs).unwrap();
        assert_eq!(rules.match_against("app_foo"), Some((0, "1", 1.0)));
        assert_eq!(rules.match_against("other"), Some((1, "standby", 0.5)));
    }
}
