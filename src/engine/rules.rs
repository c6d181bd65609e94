use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use super::actions::RuleAction;
use super::condition::RuleCondition;
use super::VisitContext;

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    And,
    Or,
}

impl Default for MatchMode {
    fn default() -> Self {
        MatchMode::And
    }
}

/// One owner-configured redirection rule attached to a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub link_id: Option<Uuid>,
    /// 0–999, lower evaluates first. Ties keep submission order.
    #[serde(default)]
    pub priority: u16,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "match", default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_action: Option<RuleAction>,
}

fn default_enabled() -> bool {
    true
}

impl LinkRule {
    /// Combine this rule's conditions against one visit.
    ///
    /// An empty condition list matches vacuously. Evaluation
    /// short-circuits: AND stops at the first false, OR at the first
    /// true. A condition that fails to compile surfaces as an error so
    /// the engine can skip the whole rule.
    pub fn matches(&self, ctx: &VisitContext) -> Result<bool> {
        if self.conditions.is_empty() {
            return Ok(true);
        }

        match self.match_mode {
            MatchMode::And => {
                for condition in &self.conditions {
                    if !condition.compile()?.evaluate(ctx) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchMode::Or => {
                for condition in &self.conditions {
                    if condition.compile()?.evaluate(ctx) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::condition::{ConditionField, ConditionOperator};
    use crate::engine::Device;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ctx() -> VisitContext {
        VisitContext {
            country: "ES".to_string(),
            device: Device::Desktop,
            ip: "198.51.100.9".to_string(),
            is_bot: false,
            is_vpn: false,
            now: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            access_count: 3,
        }
    }

    fn rule(match_mode: MatchMode, conditions: Vec<RuleCondition>) -> LinkRule {
        LinkRule {
            id: Uuid::new_v4(),
            link_id: None,
            priority: 0,
            enabled: true,
            match_mode,
            conditions,
            action: RuleAction::BlockAccess {
                reason: None,
                message: None,
            },
            else_action: None,
        }
    }

    fn country_es() -> RuleCondition {
        RuleCondition {
            field: ConditionField::Country,
            operator: ConditionOperator::Equals,
            value: json!("ES"),
        }
    }

    fn device_mobile() -> RuleCondition {
        RuleCondition {
            field: ConditionField::Device,
            operator: ConditionOperator::Equals,
            value: json!("mobile"),
        }
    }

    #[test]
    fn empty_conditions_match_vacuously() {
        assert!(rule(MatchMode::And, vec![]).matches(&ctx()).unwrap());
        assert!(rule(MatchMode::Or, vec![]).matches(&ctx()).unwrap());
    }

    #[test]
    fn and_requires_every_condition() {
        // Context satisfies the country condition but not the device one.
        let r = rule(MatchMode::And, vec![country_es(), device_mobile()]);
        assert!(!r.matches(&ctx()).unwrap());
    }

    #[test]
    fn or_requires_any_condition() {
        let r = rule(MatchMode::Or, vec![country_es(), device_mobile()]);
        assert!(r.matches(&ctx()).unwrap());
    }

    #[test]
    fn malformed_condition_surfaces_as_error() {
        let bad = RuleCondition {
            field: ConditionField::Country,
            operator: ConditionOperator::GreaterThan,
            value: json!("ES"),
        };
        let r = rule(MatchMode::And, vec![bad]);
        assert!(r.matches(&ctx()).is_err());
    }

    #[test]
    fn rule_deserializes_with_defaults() {
        let raw = json!({
            "conditions": [{"field": "country", "operator": "in", "value": ["ES"]}],
            "action": {"type": "redirect", "url": "https://es.example.com"}
        });
        let r: LinkRule = serde_json::from_value(raw).unwrap();
        assert!(r.enabled);
        assert_eq!(r.priority, 0);
        assert_eq!(r.match_mode, MatchMode::And);
        assert!(r.else_action.is_none());
    }
}
