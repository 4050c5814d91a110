//! Applies a change set to a zone in bounded batches.
//!
//! Removals go first, then replacements, each split into batches of at most
//! `chunk_size` RRset operations in name order. The first batch that does
//! not come back with `204 No Content` stops the run; batches applied before
//! it stay applied.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PatchFailure, SyncError, TransportError};
use crate::metrics::{self, BatchOutcome};
use crate::record::{RecordType, ResourceRecord, ZoneRecords};
use crate::reconcile::ChangeSet;
use crate::sync::Phase;

/// Status the zone API returns for an accepted patch or metadata update.
pub const STATUS_NO_CONTENT: u16 = 204;

/// Default number of RRset operations per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// RRset change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// Replace the whole RRset with the given records.
    Replace,
    /// Delete the RRset.
    Delete,
}

/// One record inside a replaced RRset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordContent {
    /// Record data.
    pub content: String,
    /// Always false for records written by this crate.
    pub disabled: bool,
}

/// One RRset operation in a patch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RrsetChange {
    /// Owner name (FQDN).
    pub name: String,
    /// RRset type.
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// TTL, set for replacements only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Change kind.
    pub changetype: ChangeType,
    /// New records, set for replacements only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RecordContent>,
}

impl RrsetChange {
    /// Delete the RRset `name`/`record.record_type`.
    pub fn delete(name: &str, record: &ResourceRecord) -> Self {
        Self {
            name: name.to_string(),
            record_type: record.record_type,
            ttl: None,
            changetype: ChangeType::Delete,
            records: Vec::new(),
        }
    }

    /// Replace the RRset `name`/`record.record_type` with `record`.
    pub fn replace(name: &str, record: &ResourceRecord) -> Self {
        Self {
            name: name.to_string(),
            record_type: record.record_type,
            ttl: Some(record.ttl),
            changetype: ChangeType::Replace,
            records: vec![RecordContent {
                content: record.content.clone(),
                disabled: false,
            }],
        }
    }
}

/// Body of one patch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchBatch {
    /// RRset operations.
    pub rrsets: Vec<RrsetChange>,
}

impl PatchBatch {
    /// Number of operations.
    pub fn len(&self) -> usize {
        self.rrsets.len()
    }

    /// True if the batch carries no operations.
    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty()
    }

    /// JSON form, for diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Status and body of a zone API write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, usually empty on success.
    pub body: String,
}

impl TransportResponse {
    /// True for the expected no-content status.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_NO_CONTENT
    }
}

/// Writes to a zone.
#[async_trait]
pub trait ZoneTransport: Send + Sync {
    /// Submit one patch batch.
    async fn apply_batch(&self, batch: &PatchBatch) -> Result<TransportResponse, TransportError>;

    /// Ask the server to increase the zone serial.
    async fn bump_serial(&self) -> Result<TransportResponse, TransportError>;
}

/// Outcome of the optional serial bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialBump {
    /// Not requested, or nothing was applied.
    Skipped,
    /// Accepted by the server.
    Bumped,
    /// Rejected or failed; the applied changes stand.
    Failed(String),
}

/// What the applier did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Removal batches applied.
    pub removal_batches: usize,
    /// Replacement batches applied.
    pub replacement_batches: usize,
    /// RRsets deleted.
    pub removed: usize,
    /// RRsets written.
    pub replaced: usize,
    /// Serial bump outcome.
    pub serial: SerialBump,
}

/// Split `records` into batches of at most `chunk_size` operations built by `op`.
pub fn chunk_operations(
    records: &ZoneRecords,
    chunk_size: usize,
    op: fn(&str, &ResourceRecord) -> RrsetChange,
) -> Vec<PatchBatch> {
    let operations: Vec<RrsetChange> = records.iter().map(|(name, record)| op(name, record)).collect();
    operations
        .chunks(chunk_size.max(1))
        .map(|chunk| PatchBatch {
            rrsets: chunk.to_vec(),
        })
        .collect()
}

/// Drives a [`ChangeSet`] through a [`ZoneTransport`].
pub struct PatchApplier<'a, T: ZoneTransport + ?Sized> {
    transport: &'a T,
    zone: String,
    chunk_size: usize,
    bump_serial: bool,
}

impl<'a, T: ZoneTransport + ?Sized> PatchApplier<'a, T> {
    /// Create an applier for `zone` with the default chunk size and no serial bump.
    pub fn new(transport: &'a T, zone: impl Into<String>) -> Self {
        Self {
            transport,
            zone: zone.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            bump_serial: false,
        }
    }

    /// Set the maximum operations per batch.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Request a serial bump after all batches succeed.
    pub fn bump_serial(mut self, bump: bool) -> Self {
        self.bump_serial = bump;
        self
    }

    /// Apply removals, then replacements. Stops at the first rejected batch.
    pub async fn apply(&self, changes: &ChangeSet) -> Result<ApplyReport, SyncError> {
        let removal_batches = chunk_operations(&changes.removals, self.chunk_size, RrsetChange::delete);
        let replacement_batches =
            chunk_operations(&changes.replacements, self.chunk_size, RrsetChange::replace);

        info!(
            zone = %self.zone,
            removals = changes.removals.len(),
            replacements = changes.replacements.len(),
            removal_batches = removal_batches.len(),
            replacement_batches = replacement_batches.len(),
            "applying change set"
        );

        self.apply_phase(Phase::ApplyRemovals, &removal_batches, 0).await?;
        self.apply_phase(
            Phase::ApplyReplacements,
            &replacement_batches,
            removal_batches.len(),
        )
        .await?;

        let serial = if self.bump_serial && !changes.is_empty() {
            self.request_serial_bump().await
        } else {
            SerialBump::Skipped
        };

        Ok(ApplyReport {
            removal_batches: removal_batches.len(),
            replacement_batches: replacement_batches.len(),
            removed: changes.removals.len(),
            replaced: changes.replacements.len(),
            serial,
        })
    }

    async fn apply_phase(
        &self,
        phase: Phase,
        batches: &[PatchBatch],
        applied_before: usize,
    ) -> Result<(), SyncError> {
        debug!(zone = %self.zone, %phase, batches = batches.len(), "entering phase");

        for (index, batch) in batches.iter().enumerate() {
            let failure = |status: Option<u16>, body: String| PatchFailure {
                zone: self.zone.clone(),
                phase,
                batch: index,
                status,
                body,
                payload: batch.to_json(),
                operations: batch.len(),
                applied_batches: applied_before + index,
            };

            match self.transport.apply_batch(batch).await {
                Ok(response) if response.is_success() => {
                    debug!(zone = %self.zone, %phase, batch = index, operations = batch.len(), "batch applied");
                    metrics::record_batch(&self.zone, phase, BatchOutcome::Applied, batch.len());
                }
                Ok(response) => {
                    metrics::record_batch(&self.zone, phase, BatchOutcome::Rejected, batch.len());
                    return Err(failure(Some(response.status), response.body).into());
                }
                Err(e) => {
                    metrics::record_batch(&self.zone, phase, BatchOutcome::Failed, batch.len());
                    return Err(failure(None, e.to_string()).into());
                }
            }
        }
        Ok(())
    }

    async fn request_serial_bump(&self) -> SerialBump {
        debug!(zone = %self.zone, phase = %Phase::BumpSerial, "entering phase");
        match self.transport.bump_serial().await {
            Ok(response) if response.is_success() => {
                info!(zone = %self.zone, "zone serial bumped");
                SerialBump::Bumped
            }
            Ok(response) => {
                let reason = format!("status {}: {}", response.status, response.body);
                warn!(zone = %self.zone, %reason, "serial bump rejected");
                SerialBump::Failed(reason)
            }
            Err(e) => {
                warn!(zone = %self.zone, error = %e, "serial bump failed");
                SerialBump::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records batches; rejects the batch with the given index.
    struct RecordingTransport {
        batches: Mutex<Vec<PatchBatch>>,
        reject_at: Option<usize>,
        serial_status: u16,
        serial_calls: Mutex<usize>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                reject_at: None,
                serial_status: STATUS_NO_CONTENT,
                serial_calls: Mutex::new(0),
            }
        }

        fn batches(&self) -> Vec<PatchBatch> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ZoneTransport for RecordingTransport {
        async fn apply_batch(&self, batch: &PatchBatch) -> Result<TransportResponse, TransportError> {
            let mut batches = self.batches.lock().unwrap();
            let index = batches.len();
            batches.push(batch.clone());
            let status = if self.reject_at == Some(index) { 422 } else { STATUS_NO_CONTENT };
            Ok(TransportResponse {
                status,
                body: if status == 422 { "RRset invalid".to_string() } else { String::new() },
            })
        }

        async fn bump_serial(&self) -> Result<TransportResponse, TransportError> {
            *self.serial_calls.lock().unwrap() += 1;
            Ok(TransportResponse {
                status: self.serial_status,
                body: String::new(),
            })
        }
    }

    fn records(prefix: &str, count: usize) -> ZoneRecords {
        (0..count)
            .map(|i| (format!("{prefix}{i:05}.hamip.at."), ResourceRecord::a("44.0.0.1", 600)))
            .collect()
    }

    #[tokio::test]
    async fn test_replacements_are_chunked() {
        let transport = RecordingTransport::new();
        let changes = ChangeSet {
            replacements: records("h", 1200),
            ..ChangeSet::default()
        };

        let report = PatchApplier::new(&transport, "hamip.at.")
            .chunk_size(500)
            .apply(&changes)
            .await
            .unwrap();

        let sizes: Vec<usize> = transport.batches().iter().map(PatchBatch::len).collect();
        assert_eq!(sizes, vec![500, 500, 200]);
        assert_eq!(report.replacement_batches, 3);
        assert_eq!(report.replaced, 1200);

        let names: Vec<String> = transport
            .batches()
            .iter()
            .flat_map(|b| b.rrsets.iter().map(|r| r.name.clone()))
            .collect();
        let expected: Vec<String> = changes.replacements.names().map(str::to_string).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_removals_are_applied_first() {
        let transport = RecordingTransport::new();
        let changes = ChangeSet {
            removals: records("old", 3),
            replacements: records("new", 3),
            ..ChangeSet::default()
        };

        PatchApplier::new(&transport, "hamip.at.")
            .chunk_size(2)
            .apply(&changes)
            .await
            .unwrap();

        let kinds: Vec<Vec<ChangeType>> = transport
            .batches()
            .iter()
            .map(|b| b.rrsets.iter().map(|r| r.changetype).collect())
            .collect();
        assert_eq!(
            kinds,
            vec![
                vec![ChangeType::Delete, ChangeType::Delete],
                vec![ChangeType::Delete],
                vec![ChangeType::Replace, ChangeType::Replace],
                vec![ChangeType::Replace],
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_batch_stops_everything() {
        let transport = RecordingTransport {
            reject_at: Some(1),
            ..RecordingTransport::new()
        };
        let changes = ChangeSet {
            removals: records("old", 5),
            replacements: records("new", 5),
            ..ChangeSet::default()
        };

        let err = PatchApplier::new(&transport, "hamip.at.")
            .chunk_size(2)
            .bump_serial(true)
            .apply(&changes)
            .await
            .unwrap_err();

        assert_eq!(transport.batches().len(), 2);
        assert_eq!(*transport.serial_calls.lock().unwrap(), 0);
        match err {
            SyncError::Patch(failure) => {
                assert_eq!(failure.phase, Phase::ApplyRemovals);
                assert_eq!(failure.batch, 1);
                assert_eq!(failure.status, Some(422));
                assert_eq!(failure.body, "RRset invalid");
                assert_eq!(failure.operations, 2);
                assert_eq!(failure.applied_batches, 1);
                assert_eq!(failure.payload["rrsets"][0]["changetype"], "DELETE");
            }
            other => panic!("expected patch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serial_bump_failure_is_reported_not_fatal() {
        let transport = RecordingTransport {
            serial_status: 500,
            ..RecordingTransport::new()
        };
        let changes = ChangeSet {
            replacements: records("h", 1),
            ..ChangeSet::default()
        };

        let report = PatchApplier::new(&transport, "hamip.at.")
            .bump_serial(true)
            .apply(&changes)
            .await
            .unwrap();
        assert!(matches!(report.serial, SerialBump::Failed(_)));
        assert_eq!(report.replaced, 1);
    }

    #[tokio::test]
    async fn test_empty_change_set_sends_nothing() {
        let transport = RecordingTransport::new();
        let report = PatchApplier::new(&transport, "hamip.at.")
            .bump_serial(true)
            .apply(&ChangeSet::default())
            .await
            .unwrap();
        assert!(transport.batches().is_empty());
        assert_eq!(report.serial, SerialBump::Skipped);
        assert_eq!(*transport.serial_calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_operation_payloads() {
        let delete = RrsetChange::delete("stale.hamip.at.", &ResourceRecord::a("1.2.3.4", 600));
        assert_eq!(
            serde_json::to_value(&delete).unwrap(),
            serde_json::json!({"name": "stale.hamip.at.", "type": "A", "changetype": "DELETE"})
        );

        let replace = RrsetChange::replace(
            "www.oe3xnr.hamip.at.",
            &ResourceRecord::cname("web.oe3xnr.hamip.at.", 600),
        );
        assert_eq!(
            serde_json::to_value(&replace).unwrap(),
            serde_json::json!({
                "name": "www.oe3xnr.hamip.at.",
                "type": "CNAME",
                "ttl": 600,
                "changetype": "REPLACE",
                "records": [{"content": "web.oe3xnr.hamip.at.", "disabled": false}]
            })
        );
    }
}
