use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LinkGateError, Result};
use super::{Device, VisitContext};

/// Request attribute a condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Country,
    Device,
    Ip,
    IsBot,
    IsVpn,
    Date,
    AccessCount,
    /// Sentinel for unconditional rules; operator and value are ignored.
    Always,
}

impl ConditionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionField::Country => "country",
            ConditionField::Device => "device",
            ConditionField::Ip => "ip",
            ConditionField::IsBot => "is_bot",
            ConditionField::IsVpn => "is_vpn",
            ConditionField::Date => "date",
            ConditionField::AccessCount => "access_count",
            ConditionField::Always => "always",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    LessThan,
    Before,
    After,
    Contains,
    NotContains,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "not_equals",
            ConditionOperator::In => "in",
            ConditionOperator::NotIn => "not_in",
            ConditionOperator::GreaterThan => "greater_than",
            ConditionOperator::LessThan => "less_than",
            ConditionOperator::Before => "before",
            ConditionOperator::After => "after",
            ConditionOperator::Contains => "contains",
            ConditionOperator::NotContains => "not_contains",
        }
    }
}

/// One stored condition. `value` is loosely typed as it arrives from
/// config or the rules API; `compile` narrows it before evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Condition narrowed to a concrete comparison, ready to evaluate.
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    Always,
    CountryEquals(String),
    CountryNotEquals(String),
    CountryIn(Vec<String>),
    CountryNotIn(Vec<String>),
    DeviceEquals(Device),
    DeviceNotEquals(Device),
    IpEquals(String),
    IpNotEquals(String),
    IpContains(String),
    IpNotContains(String),
    IsBot(bool),
    IsVpn(bool),
    DateBefore(DateTime<Utc>),
    DateAfter(DateTime<Utc>),
    AccessCountEquals(u64),
    AccessCountGreaterThan(u64),
    AccessCountLessThan(u64),
}

impl RuleCondition {
    /// Validate the field/operator/value combination and narrow the
    /// loosely-typed value into a [`CompiledCondition`].
    pub fn compile(&self) -> Result<CompiledCondition> {
        use ConditionField as F;
        use ConditionOperator as O;

        match (self.field, self.operator) {
            (F::Always, _) => Ok(CompiledCondition::Always),

            (F::Country, O::Equals) => {
                Ok(CompiledCondition::CountryEquals(self.expect_country()?))
            }
            (F::Country, O::NotEquals) => {
                Ok(CompiledCondition::CountryNotEquals(self.expect_country()?))
            }
            (F::Country, O::In) => Ok(CompiledCondition::CountryIn(self.expect_country_list()?)),
            (F::Country, O::NotIn) => {
                Ok(CompiledCondition::CountryNotIn(self.expect_country_list()?))
            }

            (F::Device, O::Equals) => Ok(CompiledCondition::DeviceEquals(self.expect_device()?)),
            (F::Device, O::NotEquals) => {
                Ok(CompiledCondition::DeviceNotEquals(self.expect_device()?))
            }

            (F::Ip, O::Equals) => Ok(CompiledCondition::IpEquals(self.expect_string()?)),
            (F::Ip, O::NotEquals) => Ok(CompiledCondition::IpNotEquals(self.expect_string()?)),
            (F::Ip, O::Contains) => Ok(CompiledCondition::IpContains(self.expect_string()?)),
            (F::Ip, O::NotContains) => {
                Ok(CompiledCondition::IpNotContains(self.expect_string()?))
            }

            // Boolean fields only make sense under equals.
            (F::IsBot, O::Equals) => Ok(CompiledCondition::IsBot(self.expect_bool()?)),
            (F::IsVpn, O::Equals) => Ok(CompiledCondition::IsVpn(self.expect_bool()?)),

            (F::Date, O::Before) => Ok(CompiledCondition::DateBefore(self.expect_datetime()?)),
            (F::Date, O::After) => Ok(CompiledCondition::DateAfter(self.expect_datetime()?)),

            (F::AccessCount, O::Equals) => {
                Ok(CompiledCondition::AccessCountEquals(self.expect_u64()?))
            }
            (F::AccessCount, O::GreaterThan) => {
                Ok(CompiledCondition::AccessCountGreaterThan(self.expect_u64()?))
            }
            (F::AccessCount, O::LessThan) => {
                Ok(CompiledCondition::AccessCountLessThan(self.expect_u64()?))
            }

            (field, operator) => Err(LinkGateError::InvalidCondition {
                field: field.as_str().to_string(),
                operator: operator.as_str().to_string(),
            }),
        }
    }

    fn expect_string(&self) -> Result<String> {
        self.value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LinkGateError::InvalidConditionValue {
                field: self.field.as_str().to_string(),
                expected: "string".to_string(),
            })
    }

    fn expect_country(&self) -> Result<String> {
        Ok(self.expect_string()?.to_uppercase())
    }

    fn expect_country_list(&self) -> Result<Vec<String>> {
        let arr = self.value.as_array().ok_or_else(|| {
            LinkGateError::InvalidConditionValue {
                field: self.field.as_str().to_string(),
                expected: "array of strings".to_string(),
            }
        })?;

        let mut codes = Vec::with_capacity(arr.len());
        for item in arr {
            let code = item.as_str().ok_or_else(|| LinkGateError::InvalidConditionValue {
                field: self.field.as_str().to_string(),
                expected: "array of strings".to_string(),
            })?;
            codes.push(code.to_uppercase());
        }
        Ok(codes)
    }

    fn expect_device(&self) -> Result<Device> {
        match self.value.as_str() {
            Some("mobile") => Ok(Device::Mobile),
            Some("tablet") => Ok(Device::Tablet),
            Some("desktop") => Ok(Device::Desktop),
            _ => Err(LinkGateError::InvalidConditionValue {
                field: self.field.as_str().to_string(),
                expected: "one of mobile, tablet, desktop".to_string(),
            }),
        }
    }

    fn expect_bool(&self) -> Result<bool> {
        self.value
            .as_bool()
            .ok_or_else(|| LinkGateError::InvalidConditionValue {
                field: self.field.as_str().to_string(),
                expected: "boolean".to_string(),
            })
    }

    fn expect_u64(&self) -> Result<u64> {
        self.value
            .as_u64()
            .ok_or_else(|| LinkGateError::InvalidConditionValue {
                field: self.field.as_str().to_string(),
                expected: "non-negative integer".to_string(),
            })
    }

    fn expect_datetime(&self) -> Result<DateTime<Utc>> {
        let raw = self.expect_string()?;
        parse_iso_datetime(&raw).ok_or_else(|| LinkGateError::InvalidConditionValue {
            field: self.field.as_str().to_string(),
            expected: "ISO 8601 date or datetime".to_string(),
        })
    }
}

/// Accepts RFC 3339 timestamps and bare dates (midnight UTC).
fn parse_iso_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

impl CompiledCondition {
    /// Test the condition against one visit. Pure and total.
    pub fn evaluate(&self, ctx: &VisitContext) -> bool {
        match self {
            CompiledCondition::Always => true,

            CompiledCondition::CountryEquals(code) => ctx.country.eq_ignore_ascii_case(code),
            CompiledCondition::CountryNotEquals(code) => !ctx.country.eq_ignore_ascii_case(code),
            CompiledCondition::CountryIn(codes) => {
                codes.iter().any(|c| ctx.country.eq_ignore_ascii_case(c))
            }
            CompiledCondition::CountryNotIn(codes) => {
                !codes.iter().any(|c| ctx.country.eq_ignore_ascii_case(c))
            }

            CompiledCondition::DeviceEquals(device) => ctx.device == *device,
            CompiledCondition::DeviceNotEquals(device) => ctx.device != *device,

            CompiledCondition::IpEquals(ip) => ctx.ip == *ip,
            CompiledCondition::IpNotEquals(ip) => ctx.ip != *ip,
            // Literal substring containment, no CIDR semantics.
            CompiledCondition::IpContains(fragment) => ctx.ip.contains(fragment.as_str()),
            CompiledCondition::IpNotContains(fragment) => !ctx.ip.contains(fragment.as_str()),

            CompiledCondition::IsBot(expected) => ctx.is_bot == *expected,
            CompiledCondition::IsVpn(expected) => ctx.is_vpn == *expected,

            CompiledCondition::DateBefore(instant) => ctx.now < *instant,
            CompiledCondition::DateAfter(instant) => ctx.now > *instant,

            CompiledCondition::AccessCountEquals(n) => ctx.access_count == *n,
            CompiledCondition::AccessCountGreaterThan(n) => ctx.access_count > *n,
            CompiledCondition::AccessCountLessThan(n) => ctx.access_count < *n,
        }
    }
}

/// Compile and evaluate in one step.
pub fn evaluate(condition: &RuleCondition, ctx: &VisitContext) -> Result<bool> {
    Ok(condition.compile()?.evaluate(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> VisitContext {
        VisitContext {
            country: "ES".to_string(),
            device: Device::Mobile,
            ip: "203.0.113.40".to_string(),
            is_bot: false,
            is_vpn: false,
            now: Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
            access_count: 7,
        }
    }

    fn cond(field: ConditionField, operator: ConditionOperator, value: serde_json::Value) -> RuleCondition {
        RuleCondition {
            field,
            operator,
            value,
        }
    }

    #[test]
    fn country_equals_is_case_insensitive() {
        let c = cond(ConditionField::Country, ConditionOperator::Equals, json!("es"));
        assert!(evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn country_membership() {
        let c = cond(
            ConditionField::Country,
            ConditionOperator::In,
            json!(["us", "es"]),
        );
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(
            ConditionField::Country,
            ConditionOperator::NotIn,
            json!(["US", "FR"]),
        );
        assert!(evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn country_in_requires_array_value() {
        let c = cond(ConditionField::Country, ConditionOperator::In, json!("ES"));
        assert!(matches!(
            evaluate(&c, &ctx()),
            Err(LinkGateError::InvalidConditionValue { .. })
        ));
    }

    #[test]
    fn device_comparisons() {
        let c = cond(ConditionField::Device, ConditionOperator::Equals, json!("mobile"));
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(
            ConditionField::Device,
            ConditionOperator::NotEquals,
            json!("desktop"),
        );
        assert!(evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn ip_contains_is_literal_substring() {
        let c = cond(ConditionField::Ip, ConditionOperator::Contains, json!("203.0.113."));
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(ConditionField::Ip, ConditionOperator::Contains, json!("10.0."));
        assert!(!evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn boolean_fields_compare_by_identity() {
        let c = cond(ConditionField::IsBot, ConditionOperator::Equals, json!(false));
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(ConditionField::IsVpn, ConditionOperator::Equals, json!(true));
        assert!(!evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn boolean_fields_reject_other_operators() {
        let c = cond(ConditionField::IsBot, ConditionOperator::Contains, json!(true));
        assert!(matches!(
            evaluate(&c, &ctx()),
            Err(LinkGateError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn date_before_and_after() {
        let c = cond(
            ConditionField::Date,
            ConditionOperator::Before,
            json!("2025-12-31T00:00:00Z"),
        );
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(ConditionField::Date, ConditionOperator::After, json!("2025-01-01"));
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(
            ConditionField::Date,
            ConditionOperator::After,
            json!("2026-01-01"),
        );
        assert!(!evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn access_count_comparisons() {
        let c = cond(
            ConditionField::AccessCount,
            ConditionOperator::GreaterThan,
            json!(5),
        );
        assert!(evaluate(&c, &ctx()).unwrap());

        let c = cond(
            ConditionField::AccessCount,
            ConditionOperator::LessThan,
            json!(5),
        );
        assert!(!evaluate(&c, &ctx()).unwrap());

        let c = cond(ConditionField::AccessCount, ConditionOperator::Equals, json!(7));
        assert!(evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn always_ignores_operator_and_value() {
        let c = cond(
            ConditionField::Always,
            ConditionOperator::GreaterThan,
            serde_json::Value::Null,
        );
        assert!(evaluate(&c, &ctx()).unwrap());
    }

    #[test]
    fn unsupported_combination_is_rejected() {
        // Scenario 5 shape: country with a numeric comparison.
        let c = cond(
            ConditionField::Country,
            ConditionOperator::GreaterThan,
            json!("ES"),
        );
        assert!(matches!(
            evaluate(&c, &ctx()),
            Err(LinkGateError::InvalidCondition { .. })
        ));
    }
}
