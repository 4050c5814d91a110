//! HamnetDB registry entries and the fetcher that reads them.
//!
//! The registry is loosely typed: `deleted` arrives as `0`/`1`, strings may be
//! `null`. Decoding is lenient per field but strict about the payload shape;
//! anything other than a JSON array is a [`SyncError::RegistryFetch`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::SyncError;
use crate::http;
use crate::metrics;

/// A host as listed by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawHostEntry {
    /// Site code (e.g., "oe3xnr").
    #[serde(default, deserialize_with = "lenient_string")]
    pub site: String,
    /// Host name relative to the suffix (e.g., "web.oe3xnr").
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// IPv4 address.
    #[serde(default, deserialize_with = "lenient_string")]
    pub ip: String,
    /// Comma-separated alias names relative to the suffix.
    #[serde(default, deserialize_with = "lenient_string")]
    pub aliases: String,
    /// Soft-deleted in the registry. Missing counts as deleted.
    #[serde(default = "missing_flag", deserialize_with = "deleted_flag")]
    pub deleted: bool,
}

impl RawHostEntry {
    /// Trimmed, non-empty alias tokens in listed order.
    pub fn alias_names(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .split(',')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
    }
}

/// A subnet as listed by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawSubnetEntry {
    /// Network in CIDR notation (e.g., "44.143.53.32/28").
    #[serde(rename = "ip", default, deserialize_with = "lenient_string")]
    pub cidr: String,
    /// First address of the network as an integer.
    #[serde(default)]
    pub begin_ip: Option<u32>,
    /// Last-octet DHCP range, "start-end".
    #[serde(default, deserialize_with = "lenient_string")]
    pub dhcp_range: String,
    /// Soft-deleted in the registry. Missing counts as deleted.
    #[serde(default = "missing_flag", deserialize_with = "deleted_flag")]
    pub deleted: bool,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn missing_flag() -> bool {
    true
}

fn deleted_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => true,
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(i)) => i != 0,
        Some(Flag::Str(s)) => s.trim() != "0",
    })
}

/// Decode a registry host listing.
pub fn parse_hosts(body: &str) -> Result<Vec<RawHostEntry>, SyncError> {
    parse_listing(body, "host")
}

/// Decode a registry subnet listing.
pub fn parse_subnets(body: &str) -> Result<Vec<RawSubnetEntry>, SyncError> {
    parse_listing(body, "subnet")
}

fn parse_listing<T: DeserializeOwned>(body: &str, kind: &str) -> Result<Vec<T>, SyncError> {
    serde_json::from_str(body)
        .map_err(|e| SyncError::RegistryFetch(format!("malformed {kind} listing: {e}")))
}

/// Source of raw registry entries.
#[async_trait]
pub trait RegistryFetcher: Send + Sync {
    /// All host entries, deleted ones included.
    async fn fetch_hosts(&self) -> Result<Vec<RawHostEntry>, SyncError>;

    /// All subnet entries, deleted ones included.
    async fn fetch_subnets(&self) -> Result<Vec<RawSubnetEntry>, SyncError>;
}

/// Reads the HamnetDB JSON listings over HTTP.
pub struct HamnetDbClient {
    http: reqwest::Client,
    config: RegistryConfig,
}

impl HamnetDbClient {
    /// Create a client for the given registry configuration.
    pub fn new(config: RegistryConfig) -> Result<Self, SyncError> {
        Ok(Self {
            http: http::client(config.timeout_secs)?,
            config,
        })
    }

    async fn fetch(&self, url: &str, kind: &str) -> Result<String, SyncError> {
        debug!(url, kind, "fetching registry listing");
        let (status, body) = http::read(kind, self.config.retry, || self.http.get(url))
            .await
            .map_err(|e| SyncError::RegistryFetch(format!("{kind} listing from {url}: {e}")))?;

        if !status.is_success() {
            return Err(SyncError::RegistryFetch(format!(
                "{kind} listing from {url} returned {status}"
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl RegistryFetcher for HamnetDbClient {
    async fn fetch_hosts(&self) -> Result<Vec<RawHostEntry>, SyncError> {
        let body = self.fetch(&self.config.hosts_url, "host").await?;
        let hosts = parse_hosts(&body)?;
        info!(count = hosts.len(), "fetched registry hosts");
        metrics::record_registry_entries("host", hosts.len());
        Ok(hosts)
    }

    async fn fetch_subnets(&self) -> Result<Vec<RawSubnetEntry>, SyncError> {
        let body = self.fetch(&self.config.subnets_url, "subnet").await?;
        let subnets = parse_subnets(&body)?;
        info!(count = subnets.len(), "fetched registry subnets");
        metrics::record_registry_entries("subnet", subnets.len());
        Ok(subnets)
    }
}
