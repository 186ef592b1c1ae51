mod redirect;

pub use redirect::{resolve_token, RedirectRule, RuleList};

use nanorand::{Rng, WyRand};

use crate::pgrelay::cluster::{ClusterView, SessionContext};

/// The two optional redirect lists a `ClusterConfig` may carry, pre-compiled.
/// Borrowed rather than owned so the balancer doesn't need to know how the
/// embedding binary stores its config.
#[derive(Default)]
pub struct Redirects<'a> {
    pub dbnames: Option<&'a RuleList>,
    pub app_names: Option<&'a RuleList>,
}

/// Select which backend node should service a client session.
///
/// Implements the seven-step decision ordering: a single uniform draw reused
/// for the preference weight test, database- then application-name redirect
/// matching (app-name match overrides a database match), resolution of the
/// matched token to a suggested node id, weighted acceptance of that
/// suggestion, the standby-preference/primary-fallback special case, and
/// finally a weighted walk over all `valid_raw` nodes excluding whichever
/// node the weight test rejected (and, for a standby preference, the primary
/// itself).
///
/// `select_node` is a closed function: the return value is always either
/// `cluster.master_node_id` or a node id with `valid_raw(i) == true`.
pub fn select_node(cluster: &ClusterView, ctx: &SessionContext, redirects: &Redirects, rng: &mut WyRand) -> i32 {
    // nanorand's RandomGen impl for f64 draws uniformly from [0.0, 1.0).
    let r: f64 = rng.generate();

    let mut target_token: Option<String> = None;
    let mut weight = 0.0f64;

    if cluster.streaming_replication_mode {
        if let Some(rules) = redirects.dbnames {
            if let Some((_, token, w)) = rules.match_against(&ctx.database) {
                target_token = Some(token.to_string());
                weight = w;
            }
        }
    }

    if let Some(rules) = redirects.app_names {
        if let Some(app_name) = ctx.application_name.as_deref().filter(|s| !s.is_empty()) {
            if let Some((_, token, w)) = rules.match_against(app_name) {
                // an application-name match overrides any database match.
                target_token = Some(token.to_string());
                weight = w;
            }
        }
    }

    let suggested_node_id: i32 = match &target_token {
        Some(token) => resolve_token(token, cluster),
        None => -2,
    };

    let no_load_balance_node_id: i32;
    if suggested_node_id >= 0 && r <= weight {
        return suggested_node_id;
    } else {
        no_load_balance_node_id = suggested_node_id;
    }

    if suggested_node_id == -1 && r > weight {
        return cluster.primary_node_id;
    }

    fallback_weighted_draw(cluster, no_load_balance_node_id, suggested_node_id == -1, rng)
}

/// Step 7: walk all `valid_raw` nodes in id order, excluding `no_load_balance_node_id`
/// and (when the rejected preference was "standby") the primary, accumulating weight
/// until the draw falls inside a node's span. `master_node_id` is the safety net
/// returned when no node is eligible or the eligible total weight is zero.
fn fallback_weighted_draw(cluster: &ClusterView, no_load_balance_node_id: i32, exclude_primary: bool, rng: &mut WyRand) -> i32 {
    let mut selected = cluster.master_node_id;

    let eligible = |i: i32, node: &crate::pgrelay::cluster::BackendNodeView| {
        node.valid_raw && i != no_load_balance_node_id && !(exclude_primary && i == cluster.primary_node_id)
    };

    let total_weight: f64 = cluster
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, node)| eligible(*i as i32, node))
        .map(|(_, node)| node.weight)
        .sum();

    if total_weight <= 0.0 {
        return selected;
    }

    let draw: f64 = rng.generate::<f64>() * total_weight;
    let mut cursor = 0.0f64;
    for (i, node) in cluster.nodes.iter().enumerate() {
        let id = i as i32;
        if !eligible(id, node) || node.weight <= 0.0 {
            continue;
        }
        if draw >= cursor {
            selected = id;
        } else {
            break;
        }
        cursor += node.weight;
    }
    selected
}
