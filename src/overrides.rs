//! Static records that are always published and never removed.
//!
//! Loaded from a YAML mapping of `name: {type, content, ttl}`. Names without
//! a trailing dot are relative to the zone, `@` is the apex.
//!
//! ```yaml
//! "@":    { type: A, content: 89.185.96.125, ttl: 600 }
//! "*":    { type: A, content: 89.185.96.125 }
//! status: { type: CNAME, content: web.oe3xnr }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::SyncError;
use crate::record::{normalize_fqdn, RecordType, ResourceRecord, ZoneRecords};

#[derive(Debug, Deserialize)]
struct OverrideEntry {
    #[serde(rename = "type")]
    record_type: RecordType,
    content: String,
    #[serde(default = "default_ttl")]
    ttl: u32,
}

fn default_ttl() -> u32 {
    crate::record::DEFAULT_TTL
}

/// Names exempt from removal, with the records they must carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticOverrides {
    records: ZoneRecords,
}

impl StaticOverrides {
    /// No overrides.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Overrides from already-qualified records.
    pub fn from_records(records: ZoneRecords) -> Self {
        Self { records }
    }

    /// Parse overrides from YAML, qualifying names relative to `zone`.
    pub fn from_yaml_str(yaml: &str, zone: &str) -> Result<Self, SyncError> {
        let zone = normalize_fqdn(zone);
        let entries: Option<BTreeMap<String, OverrideEntry>> = serde_yaml::from_str(yaml)
            .map_err(|e| SyncError::Config(format!("static overrides: {e}")))?;

        let mut records = ZoneRecords::new();
        for (name, entry) in entries.unwrap_or_default() {
            let name = qualify(&name, &zone);
            let record = match entry.record_type {
                RecordType::Cname => ResourceRecord::cname(&qualify(&entry.content, &zone), entry.ttl),
                RecordType::A => ResourceRecord::a(entry.content, entry.ttl),
                RecordType::Txt => ResourceRecord::txt(entry.content, entry.ttl),
            };
            record
                .check(&name)
                .map_err(|reason| SyncError::Config(format!("static overrides: {reason}")))?;
            if records.set(name.clone(), record).is_some() {
                return Err(SyncError::Config(format!(
                    "static overrides: {name} is listed twice"
                )));
            }
        }

        Ok(Self { records })
    }

    /// Load overrides from a YAML file.
    pub fn load(path: &Path, zone: &str) -> Result<Self, SyncError> {
        let yaml = std::fs::read_to_string(path)?;
        let overrides = Self::from_yaml_str(&yaml, zone)?;
        info!(path = %path.display(), count = overrides.len(), "loaded static overrides");
        Ok(overrides)
    }

    /// True if `name` is exempt from removal.
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains(name)
    }

    /// The override records.
    pub fn records(&self) -> &ZoneRecords {
        &self.records
    }

    /// Number of overrides.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no overrides.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Qualify `name` relative to `zone` (`@` is the apex, a trailing dot means absolute).
pub fn qualify(name: &str, zone: &str) -> String {
    let name = name.trim();
    if name == "@" || name.is_empty() {
        normalize_fqdn(zone)
    } else if name.ends_with('.') {
        normalize_fqdn(name)
    } else {
        normalize_fqdn(&format!("{}.{}", name, zone.trim_end_matches('.')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
"@":
  type: A
  content: 89.185.96.125
  ttl: 600
"*":
  type: A
  content: 89.185.96.125
status:
  type: CNAME
  content: web.oe3xnr
mail.hamip.at.:
  type: TXT
  content: '"v=spf1 -all"'
  ttl: 3600
"#;

    #[test]
    fn test_from_yaml_qualifies_names() {
        let overrides = StaticOverrides::from_yaml_str(YAML, "hamip.at").unwrap();
        assert_eq!(overrides.len(), 4);
        assert_eq!(
            overrides.records().get("hamip.at.").unwrap(),
            &ResourceRecord::a("89.185.96.125", 600)
        );
        assert!(overrides.contains("*.hamip.at."));
        assert_eq!(
            overrides.records().get("status.hamip.at.").unwrap(),
            &ResourceRecord::cname("web.oe3xnr.hamip.at.", 600)
        );
        assert_eq!(
            overrides.records().get("mail.hamip.at.").unwrap(),
            &ResourceRecord::txt("\"v=spf1 -all\"", 3600)
        );
    }

    #[test]
    fn test_empty_yaml_is_no_overrides() {
        let overrides = StaticOverrides::from_yaml_str("", "hamip.at.").unwrap();
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_rejects_unknown_type_and_zero_ttl() {
        let unknown = "a: { type: MX, content: mail.hamip.at. }";
        assert!(matches!(
            StaticOverrides::from_yaml_str(unknown, "hamip.at."),
            Err(SyncError::Config(_))
        ));

        let zero_ttl = "a: { type: A, content: 44.143.0.1, ttl: 0 }";
        assert!(matches!(
            StaticOverrides::from_yaml_str(zero_ttl, "hamip.at."),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_after_qualification() {
        let yaml = "a: { type: A, content: 44.143.0.1 }\na.hamip.at.: { type: A, content: 44.143.0.2 }";
        assert!(matches!(
            StaticOverrides::from_yaml_str(yaml, "hamip.at."),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let overrides = StaticOverrides::load(file.path(), "hamip.at.").unwrap();
        assert_eq!(overrides.len(), 4);
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("@", "hamip.at."), "hamip.at.");
        assert_eq!(qualify("www", "hamip.at."), "www.hamip.at.");
        assert_eq!(qualify("Other.Example.", "hamip.at."), "other.example.");
    }
}
