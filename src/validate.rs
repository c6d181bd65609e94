use crate::config::PlanLimits;
use crate::engine::LinkRule;
use crate::error::{LinkGateError, Result};

pub const MAX_PRIORITY: u16 = 999;
pub const MAX_BATCH_SIZE: usize = 20;

/// Write-path validation for a link's rule set. Runs when rules are
/// created or replaced; visit evaluation never re-checks plan caps.
pub fn validate_rule_batch(rules: &[LinkRule], limits: &PlanLimits) -> Result<()> {
    if rules.is_empty() {
        return Err(LinkGateError::Validation(
            "rule batch must contain at least one rule".to_string(),
        ));
    }
    if rules.len() > MAX_BATCH_SIZE {
        return Err(LinkGateError::Validation(format!(
            "rule batch of {} exceeds the maximum of {}",
            rules.len(),
            MAX_BATCH_SIZE
        )));
    }
    if rules.len() > limits.max_rules {
        return Err(LinkGateError::Validation(format!(
            "plan allows at most {} rules per link, got {}",
            limits.max_rules,
            rules.len()
        )));
    }

    for rule in rules {
        if rule.priority > MAX_PRIORITY {
            return Err(LinkGateError::Validation(format!(
                "rule '{}' has priority {} (max {})",
                rule.id, rule.priority, MAX_PRIORITY
            )));
        }
        if rule.conditions.len() > limits.max_conditions_per_rule {
            return Err(LinkGateError::Validation(format!(
                "plan allows at most {} conditions per rule, rule '{}' has {}",
                limits.max_conditions_per_rule,
                rule.id,
                rule.conditions.len()
            )));
        }

        // Reject rules that could never evaluate, rather than letting
        // the engine skip them at visit time.
        for condition in &rule.conditions {
            condition.compile()?;
        }
        rule.action.validate_settings()?;
        if let Some(else_action) = &rule.else_action {
            else_action.validate_settings()?;
        }
    }

    Ok(())
}
