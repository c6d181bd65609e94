use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::rules::LinkRule;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub context: ContextConfig,
    pub webhook: WebhookConfig,
    pub plans: PlanConfig,
    #[serde(default)]
    pub links: Vec<LinkSeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public origin used to build short URLs for `{{shortUrl}}`
    /// substitution. Defaults to `http://{host}:{port}`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl ServerConfig {
    pub fn public_base(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

/// Settings for building the per-visit request context.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Path to a MaxMind country database. Empty disables GeoIP lookups.
    #[serde(default)]
    pub geodb_path: String,
    /// Header consulted for the country code when GeoIP yields nothing
    /// (e.g. "cf-ipcountry" behind Cloudflare).
    #[serde(default = "default_country_header")]
    pub country_header: String,
    /// Trust X-Forwarded-For / X-Real-IP for client IP extraction.
    #[serde(default = "default_true")]
    pub trust_forwarded_headers: bool,
    /// CIDR ranges treated as VPN/proxy egress addresses.
    #[serde(default)]
    pub vpn_networks: Vec<String>,
}

fn default_country_header() -> String {
    "cf-ipcountry".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

/// Per-plan write-time caps on rule sets. Enforced when rules are
/// created or replaced, never during visit evaluation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanConfig {
    pub guest: PlanLimits,
    pub registered: PlanLimits,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PlanLimits {
    pub max_rules: usize,
    pub max_conditions_per_rule: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            guest: PlanLimits {
                max_rules: 1,
                max_conditions_per_rule: 1,
            },
            registered: PlanLimits {
                max_rules: 5,
                max_conditions_per_rule: 3,
            },
        }
    }
}

/// A link declared in the config file, loaded into the store at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkSeed {
    pub short_code: String,
    pub long_url: String,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub rules: Vec<LinkRule>,
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be zero");
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("Metrics port cannot be zero when metrics are enabled");
        }

        for network in &self.context.vpn_networks {
            network
                .parse::<ipnet::IpNet>()
                .with_context(|| format!("Invalid VPN network range: {}", network))?;
        }

        let mut seen = std::collections::HashSet::new();
        for link in &self.links {
            if link.short_code.is_empty() {
                anyhow::bail!("Link short_code cannot be empty");
            }
            if link.long_url.is_empty() {
                anyhow::bail!("Link '{}' has an empty long_url", link.short_code);
            }
            if !seen.insert(link.short_code.as_str()) {
                anyhow::bail!("Duplicate link short_code: {}", link.short_code);
            }
            for rule in &link.rules {
                if rule.priority > 999 {
                    anyhow::bail!(
                        "Rule '{}' on link '{}' has priority {} (max 999)",
                        rule.id,
                        link.short_code,
                        rule.priority
                    );
                }
            }
        }

        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        serializer.serialize_str(&format!("{}s", secs))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> std::result::Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(ms) = s.strip_suffix("ms") {
            let num: u64 = ms.parse()?;
            Ok(Duration::from_millis(num))
        } else if let Some(secs) = s.strip_suffix('s') {
            let num: u64 = secs.parse()?;
            Ok(Duration::from_secs(num))
        } else if let Some(mins) = s.strip_suffix('m') {
            let num: u64 = mins.parse()?;
            Ok(Duration::from_secs(num * 60))
        } else {
            let num: u64 = s.parse()?;
            Ok(Duration::from_secs(num))
        }
    }
}
