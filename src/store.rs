use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::LinkSeed;
use crate::engine::{Link, LinkRule};
use crate::error::{LinkGateError, Result};

/// Storage seam for links and their rule sets. Rules may come back in
/// any order; the engine sorts by priority itself.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn get_link(&self, short_code: &str) -> Result<Option<Link>>;

    async fn get_rules_for_link(&self, short_code: &str) -> Result<Vec<LinkRule>>;

    /// Record one visit and return the count including it.
    async fn record_access(&self, short_code: &str) -> Result<u64>;

    /// Replace a link's whole rule set. Deleting a link drops its rules
    /// with it, so rules never outlive their parent.
    async fn replace_rules(&self, short_code: &str, rules: Vec<LinkRule>) -> Result<()>;
}

struct StoredLink {
    link: Link,
    rules: Vec<LinkRule>,
    access_count: AtomicU64,
}

/// In-memory store, seeded from config at startup.
pub struct MemoryLinkStore {
    links: DashMap<String, StoredLink>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
        }
    }

    pub fn from_seeds(seeds: &[LinkSeed], public_base: &str) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.insert_link(seed, public_base);
        }
        store
    }

    pub fn insert_link(&self, seed: &LinkSeed, public_base: &str) {
        let id = Uuid::new_v4();
        let link = Link {
            id,
            short_code: seed.short_code.clone(),
            short_url: format!("{}/{}", public_base.trim_end_matches('/'), seed.short_code),
            long_url: seed.long_url.clone(),
            password_hash: seed.password_hash.clone(),
            created_at: Utc::now(),
        };

        let mut rules = seed.rules.clone();
        for rule in &mut rules {
            rule.link_id = Some(id);
        }

        self.links.insert(
            seed.short_code.clone(),
            StoredLink {
                link,
                rules,
                access_count: AtomicU64::new(0),
            },
        );
    }
}

impl Default for MemoryLinkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn get_link(&self, short_code: &str) -> Result<Option<Link>> {
        Ok(self.links.get(short_code).map(|entry| entry.link.clone()))
    }

    async fn get_rules_for_link(&self, short_code: &str) -> Result<Vec<LinkRule>> {
        self.links
            .get(short_code)
            .map(|entry| entry.rules.clone())
            .ok_or_else(|| LinkGateError::RuleFetch {
                link: short_code.to_string(),
                reason: "unknown link".to_string(),
            })
    }

    async fn record_access(&self, short_code: &str) -> Result<u64> {
        let entry = self
            .links
            .get(short_code)
            .ok_or_else(|| LinkGateError::NotFound(short_code.to_string()))?;
        Ok(entry.access_count.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn replace_rules(&self, short_code: &str, mut rules: Vec<LinkRule>) -> Result<()> {
        let mut entry = self
            .links
            .get_mut(short_code)
            .ok_or_else(|| LinkGateError::NotFound(short_code.to_string()))?;
        let link_id = entry.link.id;
        for rule in &mut rules {
            rule.link_id = Some(link_id);
        }
        entry.rules = rules;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RuleAction;

    fn seed(code: &str) -> LinkSeed {
        LinkSeed {
            short_code: code.to_string(),
            long_url: "https://example.com".to_string(),
            password_hash: None,
            rules: vec![],
        }
    }

    #[tokio::test]
    async fn seeded_link_gets_a_short_url() {
        let store = MemoryLinkStore::from_seeds(&[seed("docs")], "https://lg.example/");
        let link = store.get_link("docs").await.unwrap().unwrap();
        assert_eq!(link.short_url, "https://lg.example/docs");
    }

    #[tokio::test]
    async fn record_access_counts_up_from_one() {
        let store = MemoryLinkStore::from_seeds(&[seed("docs")], "https://lg.example");
        assert_eq!(store.record_access("docs").await.unwrap(), 1);
        assert_eq!(store.record_access("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rules_for_unknown_link_is_a_fetch_error() {
        let store = MemoryLinkStore::new();
        assert!(matches!(
            store.get_rules_for_link("nope").await,
            Err(LinkGateError::RuleFetch { .. })
        ));
    }

    #[tokio::test]
    async fn replace_rules_binds_link_id() {
        let store = MemoryLinkStore::from_seeds(&[seed("docs")], "https://lg.example");
        let link = store.get_link("docs").await.unwrap().unwrap();

        let rule: LinkRule = serde_json::from_value(serde_json::json!({
            "action": {"type": "block_access"}
        }))
        .unwrap();
        store.replace_rules("docs", vec![rule]).await.unwrap();

        let rules = store.get_rules_for_link("docs").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].link_id, Some(link.id));
        assert!(matches!(rules[0].action, RuleAction::BlockAccess { .. }));
    }
}
