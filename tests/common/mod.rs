//! Shared test infrastructure for sync integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use hamip_sync::apply::{ChangeType, PatchBatch, TransportResponse, STATUS_NO_CONTENT};
use hamip_sync::error::TransportError;
use hamip_sync::{
    RawHostEntry, RawSubnetEntry, RegistryFetcher, ResourceRecord, SyncError, ZoneReader,
    ZoneRecords, ZoneSnapshot, ZoneTransport,
};

// --- Constants ---

pub const ZONE: &str = "hamip.at.";
pub const TTL: u32 = 600;

// --- Fixtures ---

/// A live registry host entry.
pub fn host(site: &str, name: &str, ip: &str, aliases: &str) -> RawHostEntry {
    RawHostEntry {
        site: site.to_string(),
        name: name.to_string(),
        ip: ip.to_string(),
        aliases: aliases.to_string(),
        deleted: false,
    }
}

pub fn a(ip: &str) -> ResourceRecord {
    ResourceRecord::a(ip, TTL)
}

pub fn cname(target: &str) -> ResourceRecord {
    ResourceRecord::cname(target, TTL)
}

/// Build a record set from `(name, record)` pairs.
pub fn records(entries: &[(&str, ResourceRecord)]) -> ZoneRecords {
    entries
        .iter()
        .map(|(name, record)| (name.to_string(), record.clone()))
        .collect()
}

// --- FakeRegistry ---

/// In-memory registry; optionally fails every fetch.
#[derive(Default)]
pub struct FakeRegistry {
    pub hosts: Vec<RawHostEntry>,
    pub subnets: Vec<RawSubnetEntry>,
    pub fail: bool,
}

impl FakeRegistry {
    pub fn with_hosts(hosts: Vec<RawHostEntry>) -> Self {
        Self {
            hosts,
            ..Default::default()
        }
    }
}

#[async_trait]
impl RegistryFetcher for FakeRegistry {
    async fn fetch_hosts(&self) -> Result<Vec<RawHostEntry>, SyncError> {
        if self.fail {
            return Err(SyncError::RegistryFetch("registry unreachable".to_string()));
        }
        Ok(self.hosts.clone())
    }

    async fn fetch_subnets(&self) -> Result<Vec<RawSubnetEntry>, SyncError> {
        if self.fail {
            return Err(SyncError::RegistryFetch("registry unreachable".to_string()));
        }
        Ok(self.subnets.clone())
    }
}

// --- FakeZone ---

/// In-memory zone that applies DELETE/REPLACE batches the way the zone API does.
pub struct FakeZone {
    records: Mutex<ZoneRecords>,
    multi_valued: Mutex<BTreeSet<String>>,
    serial: Mutex<u64>,
    batches: Mutex<Vec<PatchBatch>>,
    reject_at: Option<usize>,
    fail_reads: bool,
}

impl FakeZone {
    pub fn new(records: ZoneRecords) -> Self {
        Self {
            records: Mutex::new(records),
            multi_valued: Mutex::new(BTreeSet::new()),
            serial: Mutex::new(2024101501),
            batches: Mutex::new(Vec::new()),
            reject_at: None,
            fail_reads: false,
        }
    }

    /// Reject the batch with this zero-based index (counted across phases).
    pub fn rejecting_batch(mut self, index: usize) -> Self {
        self.reject_at = Some(index);
        self
    }

    /// Serve an extra enabled record in the RRset at `name`.
    pub fn with_extra_record(self, name: &str) -> Self {
        self.multi_valued.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn multi_valued(&self) -> BTreeSet<String> {
        self.multi_valued.lock().unwrap().clone()
    }

    /// Fail every zone read.
    pub fn unreachable(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn records(&self) -> ZoneRecords {
        self.records.lock().unwrap().clone()
    }

    pub fn serial(&self) -> u64 {
        *self.serial.lock().unwrap()
    }

    pub fn batches(&self) -> Vec<PatchBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ZoneReader for FakeZone {
    async fn fetch_zone(&self) -> Result<ZoneSnapshot, SyncError> {
        if self.fail_reads {
            return Err(SyncError::ZoneFetch {
                zone: ZONE.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let serial = self.serial();
        Ok(ZoneSnapshot {
            serial,
            edited_serial: serial,
            records: self.records(),
            multi_valued: self.multi_valued(),
        })
    }
}

#[async_trait]
impl ZoneTransport for FakeZone {
    async fn apply_batch(&self, batch: &PatchBatch) -> Result<TransportResponse, TransportError> {
        let index = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(batch.clone());
            batches.len() - 1
        };
        if self.reject_at == Some(index) {
            return Ok(TransportResponse {
                status: 422,
                body: r#"{"error": "RRset invalid"}"#.to_string(),
            });
        }

        let mut records = self.records.lock().unwrap();
        let mut multi_valued = self.multi_valued.lock().unwrap();
        for change in &batch.rrsets {
            multi_valued.remove(&change.name);
            match change.changetype {
                ChangeType::Delete => {
                    if records
                        .get(&change.name)
                        .is_some_and(|served| served.record_type == change.record_type)
                    {
                        records.remove(&change.name);
                    }
                }
                ChangeType::Replace => {
                    let record = ResourceRecord {
                        record_type: change.record_type,
                        content: change.records[0].content.clone(),
                        ttl: change.ttl.unwrap_or(TTL),
                    };
                    records.set(change.name.clone(), record);
                }
            }
        }
        Ok(TransportResponse {
            status: STATUS_NO_CONTENT,
            body: String::new(),
        })
    }

    async fn bump_serial(&self) -> Result<TransportResponse, TransportError> {
        *self.serial.lock().unwrap() += 1;
        Ok(TransportResponse {
            status: STATUS_NO_CONTENT,
            body: String::new(),
        })
    }
}
