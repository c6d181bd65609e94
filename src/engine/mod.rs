pub mod actions;
pub mod condition;
pub mod resolver;
pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use actions::RuleAction;
pub use condition::{ConditionField, ConditionOperator, RuleCondition};
pub use resolver::resolve;
pub use rules::{LinkRule, MatchMode};

/// Device class derived from the User-Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Tablet,
    Desktop,
}

/// Normalized attributes of one inbound visit. Built once per request
/// at the HTTP boundary; the engine never performs I/O of its own.
#[derive(Debug, Clone)]
pub struct VisitContext {
    /// Uppercase ISO 3166-1 alpha-2 code, empty when unknown.
    pub country: String,
    pub device: Device,
    pub ip: String,
    pub is_bot: bool,
    pub is_vpn: bool,
    pub now: DateTime<Utc>,
    /// Number of recorded visits to the link, including this one.
    pub access_count: u64,
}

/// A short link and its target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub short_code: String,
    /// Fully-qualified short URL, used for `{{shortUrl}}` substitution.
    pub short_url: String,
    pub long_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Final decision for one visit. Constructed per request and discarded
/// once the HTTP layer has acted on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Send the visitor to `url`.
    Redirect { url: String },
    /// Refuse the visit.
    Blocked {
        reason: Option<String>,
        message: String,
    },
    /// Gate the visit behind the link's password.
    PasswordRequired { hint: Option<String> },
    /// Fire a webhook, then send the visitor to `url` anyway. The
    /// webhook call is the caller's job; the engine only records intent.
    Notified {
        webhook_url: Option<String>,
        message: Option<String>,
        url: String,
    },
}

impl Disposition {
    /// The redirect the visitor ultimately receives, if any.
    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            Disposition::Redirect { url } => Some(url),
            Disposition::Notified { url, .. } => Some(url),
            _ => None,
        }
    }
}
