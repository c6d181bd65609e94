use serde::{Deserialize, Serialize};

use crate::error::{LinkGateError, Result};
use super::{Disposition, Link};

const LONG_URL_TOKEN: &str = "{{longUrl}}";
const SHORT_URL_TOKEN: &str = "{{shortUrl}}";

const DEFAULT_BLOCK_MESSAGE: &str = "Access to this link is not allowed";

/// What a rule does when it fires. Settings live inside the variant, so
/// a stored action can never carry fields for the wrong type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Redirect {
        /// Target URL; `{{longUrl}}` and `{{shortUrl}}` are substituted
        /// with the link's actual values.
        url: String,
    },
    BlockAccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    PasswordGate {
        password_hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    Notify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleAction::Redirect { .. } => "redirect",
            RuleAction::BlockAccess { .. } => "block_access",
            RuleAction::PasswordGate { .. } => "password_gate",
            RuleAction::Notify { .. } => "notify",
        }
    }

    /// Shape check performed at rule write time, before a rule is
    /// accepted into a link's rule set.
    pub fn validate_settings(&self) -> Result<()> {
        match self {
            RuleAction::Redirect { url } if url.trim().is_empty() => {
                Err(LinkGateError::InvalidActionSettings {
                    action: "redirect".to_string(),
                    reason: "url must not be empty".to_string(),
                })
            }
            RuleAction::PasswordGate { password_hash, .. } if password_hash.trim().is_empty() => {
                Err(LinkGateError::InvalidActionSettings {
                    action: "password_gate".to_string(),
                    reason: "password_hash must not be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Turn a fired action into the final decision for the visit.
///
/// A `notify` action is side-effect-only: it resolves to the link's
/// default redirect and leaves the actual webhook call to the caller.
pub fn resolve_action(action: &RuleAction, link: &Link) -> Result<Disposition> {
    match action {
        RuleAction::Redirect { url } => {
            if url.trim().is_empty() {
                return Err(LinkGateError::InvalidActionSettings {
                    action: "redirect".to_string(),
                    reason: "url must not be empty".to_string(),
                });
            }
            Ok(Disposition::Redirect {
                url: substitute_tokens(url, link),
            })
        }
        RuleAction::BlockAccess { reason, message } => Ok(Disposition::Blocked {
            reason: reason.clone(),
            message: message
                .clone()
                .unwrap_or_else(|| DEFAULT_BLOCK_MESSAGE.to_string()),
        }),
        RuleAction::PasswordGate { hint, .. } => Ok(Disposition::PasswordRequired {
            hint: hint.clone(),
        }),
        RuleAction::Notify {
            webhook_url,
            message,
        } => Ok(Disposition::Notified {
            webhook_url: webhook_url.clone(),
            message: message.clone(),
            url: link.long_url.clone(),
        }),
    }
}

/// The decision used when no rule produces one: a plain redirect to the
/// link's long URL.
pub fn default_disposition(link: &Link) -> Disposition {
    Disposition::Redirect {
        url: link.long_url.clone(),
    }
}

fn substitute_tokens(url: &str, link: &Link) -> String {
    url.replace(LONG_URL_TOKEN, &link.long_url)
        .replace(SHORT_URL_TOKEN, &link.short_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn link() -> Link {
        Link {
            id: Uuid::new_v4(),
            short_code: "promo".to_string(),
            short_url: "https://lg.example/promo".to_string(),
            long_url: "https://example.com/landing".to_string(),
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn redirect_substitutes_all_tokens() {
        let action = RuleAction::Redirect {
            url: "https://mirror.example/?from={{shortUrl}}&to={{longUrl}}".to_string(),
        };
        let disposition = resolve_action(&action, &link()).unwrap();
        let Disposition::Redirect { url } = disposition else {
            panic!("expected redirect");
        };
        assert_eq!(
            url,
            "https://mirror.example/?from=https://lg.example/promo&to=https://example.com/landing"
        );
        assert!(!url.contains("{{"));
    }

    #[test]
    fn redirect_with_empty_url_is_invalid() {
        let action = RuleAction::Redirect {
            url: "  ".to_string(),
        };
        assert!(matches!(
            resolve_action(&action, &link()),
            Err(LinkGateError::InvalidActionSettings { .. })
        ));
    }

    #[test]
    fn block_defaults_to_generic_message() {
        let action = RuleAction::BlockAccess {
            reason: Some("VPN not allowed".to_string()),
            message: None,
        };
        let disposition = resolve_action(&action, &link()).unwrap();
        assert_eq!(
            disposition,
            Disposition::Blocked {
                reason: Some("VPN not allowed".to_string()),
                message: DEFAULT_BLOCK_MESSAGE.to_string(),
            }
        );
    }

    #[test]
    fn password_gate_exposes_hint_only() {
        let action = RuleAction::PasswordGate {
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$hash".to_string(),
            hint: Some("team name".to_string()),
        };
        let disposition = resolve_action(&action, &link()).unwrap();
        assert_eq!(
            disposition,
            Disposition::PasswordRequired {
                hint: Some("team name".to_string()),
            }
        );
    }

    #[test]
    fn notify_falls_back_to_default_redirect() {
        let action = RuleAction::Notify {
            webhook_url: Some("https://hooks.example/x".to_string()),
            message: None,
        };
        let disposition = resolve_action(&action, &link()).unwrap();
        assert_eq!(
            disposition.redirect_url(),
            Some("https://example.com/landing")
        );
    }

    #[test]
    fn action_deserializes_by_type_tag() {
        let raw = serde_json::json!({"type": "block_access", "reason": "bots"});
        let action: RuleAction = serde_json::from_value(raw).unwrap();
        assert_eq!(action.kind(), "block_access");
    }
}
