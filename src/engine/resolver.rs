use metrics::counter;
use tracing::{debug, warn};

use super::actions::{default_disposition, resolve_action};
use super::rules::LinkRule;
use super::{Disposition, Link, VisitContext};

/// Resolve one visit against a link's rule set.
///
/// Rules are filtered to enabled ones and walked in ascending priority;
/// equal priorities keep their original relative order. The first rule
/// whose conditions match decides the visit. A rule whose conditions do
/// not match but which carries an `else_action` also decides the visit,
/// from its else branch. Rules with malformed conditions are skipped.
/// If nothing decides, the visitor gets the link's default redirect.
///
/// Never fails: per-rule errors degrade to skipping the rule or to the
/// default redirect, so one bad rule cannot break link resolution.
pub fn resolve(rules: &[LinkRule], ctx: &VisitContext, link: &Link) -> Disposition {
    // Index-augmented sort: the index makes the priority tie-break
    // explicit rather than relying on sort stability.
    let mut ordered: Vec<(usize, &LinkRule)> = rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.enabled)
        .collect();
    ordered.sort_by_key(|(idx, rule)| (rule.priority, *idx));

    for (_, rule) in ordered {
        match rule.matches(ctx) {
            Ok(true) => {
                debug!(rule_id = %rule.id, action = rule.action.kind(), "rule matched");
                counter!("linkgate_rules_matched", "action" => rule.action.kind()).increment(1);
                return apply(&rule.action, link);
            }
            Ok(false) => {
                if let Some(else_action) = &rule.else_action {
                    debug!(rule_id = %rule.id, action = else_action.kind(), "else branch taken");
                    counter!("linkgate_rules_else_taken", "action" => else_action.kind())
                        .increment(1);
                    return apply(else_action, link);
                }
            }
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "skipping malformed rule");
                counter!("linkgate_rules_skipped").increment(1);
            }
        }
    }

    counter!("linkgate_default_redirects").increment(1);
    default_disposition(link)
}

fn apply(action: &super::actions::RuleAction, link: &Link) -> Disposition {
    match resolve_action(action, link) {
        Ok(disposition) => disposition,
        Err(e) => {
            warn!(error = %e, "action settings invalid, using default redirect");
            counter!("linkgate_action_fallbacks").increment(1);
            default_disposition(link)
        }
    }
}
