//! Zone-management API client (PowerDNS HTTP API).
//!
//! ```text
//! GET   {api}/v1/servers/{server}/zones/{zone}   → serial, edited_serial, rrsets
//! PATCH {api}/v1/servers/{server}/zones/{zone}   ← {rrsets: [...]}          → 204
//! PUT   {api}/v1/servers/{server}/zones/{zone}   ← {soa_edit_api: INCREASE} → 204
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::apply::{PatchBatch, TransportResponse, ZoneTransport};
use crate::config::ZoneConfig;
use crate::error::{SyncError, TransportError};
use crate::http;
use crate::record::{normalize_fqdn, RecordType, ResourceRecord, ZoneRecords};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-API-Key";

/// The zone as currently served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSnapshot {
    /// SOA serial.
    pub serial: u64,
    /// Serial of the last edit through the API.
    pub edited_serial: u64,
    /// A, CNAME and TXT records by name.
    pub records: ZoneRecords,
    /// Names whose RRset serves more than one enabled record.
    pub multi_valued: BTreeSet<String>,
}

/// Reads the current state of a zone.
#[async_trait]
pub trait ZoneReader: Send + Sync {
    /// Fetch the zone.
    async fn fetch_zone(&self) -> Result<ZoneSnapshot, SyncError>;
}

#[derive(Debug, Deserialize)]
struct ZoneDocument {
    serial: Option<u64>,
    edited_serial: Option<u64>,
    #[serde(default)]
    rrsets: Vec<RrsetDocument>,
}

#[derive(Debug, Deserialize)]
struct RrsetDocument {
    name: String,
    #[serde(rename = "type")]
    rrtype: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    records: Vec<RecordDocument>,
}

#[derive(Debug, Deserialize)]
struct RecordDocument {
    content: String,
    #[serde(default)]
    disabled: bool,
}

/// Decode a zone document.
///
/// Only A, CNAME and TXT RRsets are kept, and of those only the first
/// enabled record; names with further enabled records are listed in
/// `multi_valued`. When one name carries several of these types, the first
/// RRset listed wins.
pub fn parse_zone(zone: &str, body: &str) -> Result<ZoneSnapshot, SyncError> {
    let fetch_error = |reason: String| SyncError::ZoneFetch {
        zone: zone.to_string(),
        reason,
    };

    let document: ZoneDocument =
        serde_json::from_str(body).map_err(|e| fetch_error(format!("malformed zone document: {e}")))?;

    let serial = document
        .serial
        .ok_or_else(|| fetch_error("zone document has no serial".to_string()))?;
    let edited_serial = document
        .edited_serial
        .ok_or_else(|| fetch_error("zone document has no edited_serial".to_string()))?;

    let mut records = ZoneRecords::new();
    let mut multi_valued = BTreeSet::new();
    for rrset in document.rrsets {
        let Ok(record_type) = rrset.rrtype.parse::<RecordType>() else {
            continue;
        };
        let Some(first) = rrset.records.iter().find(|r| !r.disabled) else {
            continue;
        };
        let enabled = rrset.records.iter().filter(|r| !r.disabled).count();

        let name = normalize_fqdn(&rrset.name);
        let record = ResourceRecord {
            record_type,
            content: first.content.clone(),
            ttl: rrset.ttl,
        };
        if !records.insert_if_absent(name.clone(), record) {
            debug!(name = %rrset.name, %record_type, "name already seen with another type");
        } else if enabled > 1 {
            debug!(name = %rrset.name, %record_type, enabled, "multi-record RRset");
            multi_valued.insert(name);
        }
    }

    if records.is_empty() {
        return Err(fetch_error("zone holds no A, CNAME or TXT records".to_string()));
    }

    Ok(ZoneSnapshot {
        serial,
        edited_serial,
        records,
        multi_valued,
    })
}

/// Client for one zone on one zone-management server.
pub struct PowerDnsClient {
    http: reqwest::Client,
    zone: String,
    zone_url: String,
    api_key: String,
    retry: bool,
}

impl PowerDnsClient {
    /// Create a client for `config`, authenticating with `api_key`.
    pub fn new(config: &ZoneConfig, api_key: String) -> Result<Self, SyncError> {
        let zone = config.fqdn();
        let zone_url = format!(
            "{}/v1/servers/{}/zones/{}",
            config.api_url.trim_end_matches('/'),
            config.server_id,
            zone
        );
        Ok(Self {
            http: http::client(config.timeout_secs)?,
            zone,
            zone_url,
            api_key,
            retry: config.retry,
        })
    }

    /// Zone URL this client talks to.
    pub fn zone_url(&self) -> &str {
        &self.zone_url
    }

    async fn write(&self, request: reqwest::RequestBuilder) -> Result<TransportResponse, TransportError> {
        let response = request.header(API_KEY_HEADER, &self.api_key).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl ZoneReader for PowerDnsClient {
    async fn fetch_zone(&self) -> Result<ZoneSnapshot, SyncError> {
        let (status, body) = http::read("zone", self.retry, || {
            self.http
                .get(&self.zone_url)
                .header(API_KEY_HEADER, &self.api_key)
        })
        .await
        .map_err(|e| SyncError::ZoneFetch {
            zone: self.zone.clone(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(SyncError::ZoneFetch {
                zone: self.zone.clone(),
                reason: format!("{} returned {}: {}", self.zone_url, status, body),
            });
        }

        let snapshot = parse_zone(&self.zone, &body)?;
        info!(
            zone = %self.zone,
            serial = snapshot.serial,
            edited_serial = snapshot.edited_serial,
            records = snapshot.records.len(),
            "fetched zone"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl ZoneTransport for PowerDnsClient {
    async fn apply_batch(&self, batch: &PatchBatch) -> Result<TransportResponse, TransportError> {
        debug!(zone = %self.zone, operations = batch.len(), "PATCH zone");
        self.write(self.http.patch(&self.zone_url).json(batch)).await
    }

    async fn bump_serial(&self) -> Result<TransportResponse, TransportError> {
        let body = serde_json::json!({ "soa_edit_api": "INCREASE" });
        self.write(self.http.put(&self.zone_url).json(&body)).await
    }
}
