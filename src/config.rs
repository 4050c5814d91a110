//! Configuration types for hamip-sync.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::record::normalize_fqdn;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HamnetDB registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Record derivation configuration.
    #[serde(default)]
    pub derive: DeriveConfig,

    /// Zones to reconcile, each as an independent run.
    pub zones: Vec<ZoneConfig>,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.zones.is_empty() {
            return Err(SyncError::Config("at least one zone is required".to_string()));
        }
        if self.derive.ttl == 0 {
            return Err(SyncError::Config("derive.ttl must be positive".to_string()));
        }
        if self.derive.suffix.trim_matches('.').is_empty() {
            return Err(SyncError::Config("derive.suffix must not be empty".to_string()));
        }
        for zone in &self.zones {
            if zone.chunk_size == 0 {
                return Err(SyncError::Config(format!(
                    "zone {}: chunk_size must be positive",
                    zone.name
                )));
            }
            if zone.max_changes == 0 {
                return Err(SyncError::Config(format!(
                    "zone {}: max_changes must be positive",
                    zone.name
                )));
            }
            if zone.tag.as_ref().is_some_and(|tag| tag.ttl == 0) {
                return Err(SyncError::Config(format!(
                    "zone {}: tag.ttl must be positive",
                    zone.name
                )));
            }
        }
        Ok(())
    }
}

/// HamnetDB registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// JSON endpoint listing hosts.
    #[serde(default = "default_hosts_url")]
    pub hosts_url: String,

    /// JSON endpoint listing subnets.
    #[serde(default = "default_subnets_url")]
    pub subnets_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry a failed read once on transient transport errors.
    #[serde(default = "default_true")]
    pub retry: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hosts_url: default_hosts_url(),
            subnets_url: default_subnets_url(),
            timeout_secs: default_timeout_secs(),
            retry: true,
        }
    }
}

/// How registry entries turn into records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriveConfig {
    /// Suffix appended to registry names (e.g., ".hamip.at.").
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Only sites starting with this prefix are considered. Empty accepts all.
    #[serde(default = "default_site_prefix")]
    pub site_prefix: String,

    /// TTL for derived records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Legacy site whose hosts are also published directly under the suffix.
    #[serde(default = "default_canonical_site")]
    pub canonical_site: Option<String>,

    /// Derive `dhcp-a-b-c-d.<site>` records from subnet DHCP ranges.
    #[serde(default)]
    pub dhcp: bool,

    /// Derive A records from `NNN-NNN-NNN-NNN-inetip.<name>` names.
    #[serde(default)]
    pub public_ip_names: bool,
}

impl DeriveConfig {
    /// Suffix in `.domain.tld.` form.
    pub fn normalized_suffix(&self) -> String {
        format!(".{}", normalize_fqdn(self.suffix.trim_start_matches('.')))
    }
}

impl Default for DeriveConfig {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            site_prefix: default_site_prefix(),
            ttl: default_ttl(),
            canonical_site: default_canonical_site(),
            dhcp: false,
            public_ip_names: false,
        }
    }
}

/// One zone on one zone-management server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone name (e.g., "hamip.at.").
    pub name: String,

    /// Base URL of the zone-management API (e.g., "https://dnsapi.example.net/api").
    pub api_url: String,

    /// Server id in the API path.
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// File holding the API key.
    pub api_key_file: PathBuf,

    /// YAML file with static overrides.
    #[serde(default)]
    pub overrides_file: Option<PathBuf>,

    /// Maximum operations per patch batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Cap on removals and on replacements per run.
    #[serde(default = "default_max_changes")]
    pub max_changes: usize,

    /// Ask the server to increase the SOA serial after a successful apply.
    #[serde(default = "default_true")]
    pub bump_serial: bool,

    /// Per-request timeout for zone reads and writes in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry a failed zone read once on transient transport errors.
    #[serde(default = "default_true")]
    pub retry: bool,

    /// TXT record stamped with the run time.
    #[serde(default)]
    pub tag: Option<TagConfig>,
}

impl ZoneConfig {
    /// Zone name in FQDN form.
    pub fn fqdn(&self) -> String {
        normalize_fqdn(&self.name)
    }
}

/// Sync-tag TXT record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Record name, relative to the zone or absolute with a trailing dot.
    #[serde(default = "default_tag_name")]
    pub name: String,

    /// TTL for the tag record.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "hamip_sync=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Write Prometheus metrics to this file on exit (node_exporter textfile collector).
    #[serde(default)]
    pub prometheus_textfile: Option<PathBuf>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_textfile: None,
            opentelemetry: None,
        }
    }
}

/// Read an API key from `path`.
///
/// The key is trimmed; a missing, unreadable or empty file is a credential error.
pub fn read_api_key(path: &Path) -> Result<String, SyncError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Credential(format!("cannot read {}: {}", path.display(), e)))?;
    let key = raw.trim();
    if key.is_empty() {
        return Err(SyncError::Credential(format!("{} is empty", path.display())));
    }
    Ok(key.to_string())
}

fn default_hosts_url() -> String {
    "https://hamnetdb.net/csv.cgi?tab=host&json=1".to_string()
}

fn default_subnets_url() -> String {
    "https://hamnetdb.net/csv.cgi?tab=subnet&json=1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_suffix() -> String {
    ".hamip.at.".to_string()
}

fn default_site_prefix() -> String {
    "oe".to_string()
}

fn default_ttl() -> u32 {
    crate::record::DEFAULT_TTL
}

fn default_canonical_site() -> Option<String> {
    Some("oe0any".to_string())
}

fn default_server_id() -> String {
    "localhost".to_string()
}

fn default_chunk_size() -> usize {
    500
}

fn default_max_changes() -> usize {
    10_000
}

fn default_tag_name() -> String {
    "_sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "hamip-sync".to_string()
}
