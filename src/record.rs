//! Record model shared by the deriver, the reconciler and the zone client.
//!
//! Every name is kept in trailing-dot FQDN form. Maps are ordered by name so
//! derivation, diffing and batching are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// TTL used for registry-derived records.
pub const DEFAULT_TTL: u32 = 600;

/// Record types this crate reads from and writes to the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    /// IPv4 address.
    A,
    /// Canonical name.
    Cname,
    /// Text.
    Txt,
}

impl RecordType {
    /// Wire name as used by the zone-management API.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            other => Err(format!("unsupported record type: {other}")),
        }
    }
}

/// A single-valued resource record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Record type.
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// Record data; an FQDN for CNAME records.
    pub content: String,
    /// TTL in seconds.
    pub ttl: u32,
}

impl ResourceRecord {
    /// An A record.
    pub fn a(ip: impl Into<String>, ttl: u32) -> Self {
        Self {
            record_type: RecordType::A,
            content: ip.into().trim().to_string(),
            ttl,
        }
    }

    /// A CNAME record; the target is normalized to FQDN form.
    pub fn cname(target: &str, ttl: u32) -> Self {
        Self {
            record_type: RecordType::Cname,
            content: normalize_fqdn(target),
            ttl,
        }
    }

    /// A TXT record. Content is stored exactly as given.
    pub fn txt(content: impl Into<String>, ttl: u32) -> Self {
        Self {
            record_type: RecordType::Txt,
            content: content.into(),
            ttl,
        }
    }

    /// Copy with CNAME content in canonical FQDN form.
    pub fn normalized(&self) -> Self {
        match self.record_type {
            RecordType::Cname => Self::cname(&self.content, self.ttl),
            RecordType::A => Self::a(self.content.clone(), self.ttl),
            RecordType::Txt => self.clone(),
        }
    }

    /// True if both records carry the same type, content and TTL after normalization.
    pub fn same_as(&self, other: &ResourceRecord) -> bool {
        self.normalized() == other.normalized()
    }

    /// Check the record invariants for a record stored at `name`.
    pub fn check(&self, name: &str) -> Result<(), String> {
        if self.ttl == 0 {
            return Err(format!("{name}: ttl must be positive"));
        }
        if self.content.trim().is_empty() {
            return Err(format!("{name}: empty content"));
        }
        if self.record_type == RecordType::Cname && normalize_fqdn(&self.content) == name {
            return Err(format!("{name}: CNAME points at itself"));
        }
        if self.content == name {
            return Err(format!("{name}: content equals its own name"));
        }
        Ok(())
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.record_type, self.ttl, self.content)
    }
}

/// Normalize a domain name: trim, lowercase, exactly one trailing dot.
pub fn normalize_fqdn(name: &str) -> String {
    let mut fqdn = name.trim().trim_end_matches('.').to_ascii_lowercase();
    fqdn.push('.');
    fqdn
}

/// Ordered `name -> record` mapping, one record per name.
///
/// Insertion is explicit check-then-insert: [`ZoneRecords::insert_if_absent`]
/// never replaces an existing entry, [`ZoneRecords::set`] always does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneRecords {
    records: BTreeMap<String, ResourceRecord>,
}

/// The record set the zone should converge to.
pub type DesiredZoneState = ZoneRecords;

/// The record set currently served by the zone.
pub type CurrentZoneState = ZoneRecords;

impl ZoneRecords {
    /// Create an empty record set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` at `name` unless the name is already taken.
    /// Returns true if the record was inserted.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, record: ResourceRecord) -> bool {
        match self.records.entry(name.into()) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Insert or replace the record at `name`, returning the previous one.
    pub fn set(&mut self, name: impl Into<String>, record: ResourceRecord) -> Option<ResourceRecord> {
        self.records.insert(name.into(), record)
    }

    /// Remove the record at `name`.
    pub fn remove(&mut self, name: &str) -> Option<ResourceRecord> {
        self.records.remove(name)
    }

    /// Record stored at `name`.
    pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
        self.records.get(name)
    }

    /// True if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no names.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Names in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// `(name, record)` pairs in lexicographic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceRecord)> {
        self.records.iter().map(|(n, r)| (n.as_str(), r))
    }
}

impl FromIterator<(String, ResourceRecord)> for ZoneRecords {
    /// Later pairs replace earlier ones on the same name.
    fn from_iter<I: IntoIterator<Item = (String, ResourceRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ZoneRecords {
    type Item = (String, ResourceRecord);
    type IntoIter = btree_map::IntoIter<String, ResourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
