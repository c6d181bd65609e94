use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use axum::http::HeaderMap;
use chrono::Utc;
use ipnet::IpNet;
use maxminddb::Reader;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::engine::{Device, VisitContext};

/// User agents that identify crawlers, scrapers, and automation tools.
static BOT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(bot|crawler|spider|scraper|scanner)").unwrap(),
        Regex::new(r"(?i)(scrapy|mechanize|python-requests|urllib|curl|wget)").unwrap(),
        Regex::new(r"(?i)(phantomjs|headlesschrome|slimerjs)").unwrap(),
        Regex::new(r"(?i)(selenium|puppeteer|playwright|webdriver)").unwrap(),
        Regex::new(r"^$|^-$|^null$|^undefined$").unwrap(),
    ]
});

static TABLET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(ipad|tablet|kindle|silk|playbook)").unwrap());

static MOBILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(iphone|ipod|blackberry|windows phone|mobile)").unwrap());

#[derive(Deserialize, Debug)]
struct GeoRecord {
    country: Option<GeoCountry>,
}

#[derive(Deserialize, Debug)]
struct GeoCountry {
    iso_code: Option<String>,
}

/// Builds the normalized [`VisitContext`] for each inbound visit.
pub struct ContextBuilder {
    config: ContextConfig,
    geo_reader: Option<Reader<Vec<u8>>>,
    vpn_networks: Vec<IpNet>,
}

impl ContextBuilder {
    pub fn new(config: &ContextConfig) -> Result<Self> {
        let geo_reader = if !config.geodb_path.is_empty()
            && std::path::Path::new(&config.geodb_path).exists()
        {
            match Reader::open_readfile(&config.geodb_path) {
                Ok(reader) => {
                    debug!("Loaded GeoIP database from {}", config.geodb_path);
                    Some(reader)
                }
                Err(e) => {
                    warn!("Failed to load GeoIP database from {}: {}", config.geodb_path, e);
                    None
                }
            }
        } else {
            None
        };

        let mut vpn_networks = Vec::with_capacity(config.vpn_networks.len());
        for raw in &config.vpn_networks {
            vpn_networks.push(raw.parse::<IpNet>()?);
        }

        Ok(Self {
            config: config.clone(),
            geo_reader,
            vpn_networks,
        })
    }

    pub fn build(&self, headers: &HeaderMap, peer: SocketAddr, access_count: u64) -> VisitContext {
        let ip = self.client_ip(headers, peer);
        let user_agent = header_str(headers, "user-agent").unwrap_or_default();

        VisitContext {
            country: self.country(headers, &ip),
            device: classify_device(&user_agent),
            is_bot: is_bot(&user_agent),
            is_vpn: self.is_vpn(&ip),
            ip,
            now: Utc::now(),
            access_count,
        }
    }

    /// Prefer X-Forwarded-For (first entry) and X-Real-IP when the
    /// deployment fronts us with a trusted proxy; otherwise use the
    /// socket peer address.
    fn client_ip(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        if self.config.trust_forwarded_headers {
            if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
                if let Some(first) = forwarded.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() && first != "unknown" {
                        return first.to_string();
                    }
                }
            }
            if let Some(real_ip) = header_str(headers, "x-real-ip") {
                let real_ip = real_ip.trim();
                if !real_ip.is_empty() && real_ip != "unknown" {
                    return real_ip.to_string();
                }
            }
        }
        peer.ip().to_string()
    }

    fn country(&self, headers: &HeaderMap, ip: &str) -> String {
        if let Some(reader) = &self.geo_reader {
            if let Ok(addr) = ip.parse::<IpAddr>() {
                match reader.lookup::<GeoRecord>(addr) {
                    Ok(record) => {
                        if let Some(code) = record.country.and_then(|c| c.iso_code) {
                            return code.to_uppercase();
                        }
                    }
                    Err(e) => debug!("GeoIP lookup failed for {}: {}", ip, e),
                }
            }
        }

        header_str(headers, &self.config.country_header)
            .map(|code| code.trim().to_uppercase())
            .filter(|code| !code.is_empty() && code != "XX")
            .unwrap_or_default()
    }

    fn is_vpn(&self, ip: &str) -> bool {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return false;
        };
        self.vpn_networks.iter().any(|net| net.contains(&addr))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn classify_device(user_agent: &str) -> Device {
    if TABLET_PATTERN.is_match(user_agent) {
        return Device::Tablet;
    }
    // Android reports "Mobile" on phones; tablets carry "Android" alone.
    let lowered = user_agent.to_lowercase();
    if lowered.contains("android") && !lowered.contains("mobile") {
        return Device::Tablet;
    }
    if MOBILE_PATTERN.is_match(user_agent) || lowered.contains("android") {
        return Device::Mobile;
    }
    Device::Desktop
}

fn is_bot(user_agent: &str) -> bool {
    BOT_PATTERNS.iter().any(|p| p.is_match(user_agent))
}
