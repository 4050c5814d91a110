//! One reconciliation run per zone.
//!
//! ```text
//! FETCH_DESIRED → FETCH_CURRENT → COMPUTE_DIFF → APPLY_REMOVALS
//!   → APPLY_REPLACEMENTS → [BUMP_SERIAL] → DONE
//!
//! any step failing → FAILED (no rollback)
//! ```
//!
//! The desired state is fetched once and shared read-only by every zone run.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use tracing::{debug, error, info};

use crate::apply::{ApplyReport, PatchApplier, ZoneTransport};
use crate::config::{TagConfig, ZoneConfig};
use crate::derive::RecordDeriver;
use crate::error::SyncError;
use crate::metrics::{self, RunOutcome, Timer};
use crate::overrides::{qualify, StaticOverrides};
use crate::reconcile::{layer_desired, Reconciler, Truncation};
use crate::record::{ResourceRecord, ZoneRecords};
use crate::registry::RegistryFetcher;
use crate::zone::ZoneReader;

/// Steps of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Fetching the registry and deriving records.
    FetchDesired,
    /// Fetching the zone.
    FetchCurrent,
    /// Computing the change set.
    ComputeDiff,
    /// Deleting RRsets.
    ApplyRemovals,
    /// Writing RRsets.
    ApplyReplacements,
    /// Requesting a serial increase.
    BumpSerial,
    /// Finished successfully.
    Done,
    /// Stopped on an error.
    Failed,
}

impl Phase {
    /// Name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FetchDesired => "fetch_desired",
            Phase::FetchCurrent => "fetch_current",
            Phase::ComputeDiff => "compute_diff",
            Phase::ApplyRemovals => "apply_removals",
            Phase::ApplyReplacements => "apply_replacements",
            Phase::BumpSerial => "bump_serial",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch the registry and derive the desired records (the FETCH_DESIRED step).
///
/// Any fetch or decode error aborts; no partial state is returned.
pub async fn fetch_desired(
    fetcher: &dyn RegistryFetcher,
    deriver: &RecordDeriver,
    with_dhcp: bool,
) -> Result<ZoneRecords, SyncError> {
    let timer = Timer::start();
    debug!(phase = %Phase::FetchDesired, "entering phase");

    let hosts = fetcher.fetch_hosts().await?;
    let mut desired = deriver.derive_hosts(&hosts);

    if with_dhcp {
        let subnets = fetcher.fetch_subnets().await?;
        let dhcp = deriver.derive_dhcp(&subnets, &desired)?;
        let mut added = 0;
        for (name, record) in dhcp {
            if desired.insert_if_absent(name, record) {
                added += 1;
            }
        }
        info!(added, "merged DHCP records");
    }

    info!(
        hosts = hosts.len(),
        records = desired.len(),
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "derived desired state"
    );
    metrics::record_derived_records(desired.len());
    Ok(desired)
}

/// Per-run options for a zone.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum operations per patch batch.
    pub chunk_size: usize,
    /// Cap on removals and on replacements.
    pub max_changes: usize,
    /// Request a serial bump after applying.
    pub bump_serial: bool,
    /// Compute and log the change set without applying it.
    pub dry_run: bool,
    /// Sync tag record, if enabled.
    pub tag: Option<TagConfig>,
}

impl SyncOptions {
    /// Options from a zone configuration.
    pub fn from_config(zone: &ZoneConfig, dry_run: bool) -> Self {
        Self {
            chunk_size: zone.chunk_size,
            max_changes: zone.max_changes,
            bump_serial: zone.bump_serial,
            dry_run,
            tag: zone.tag.clone(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::apply::DEFAULT_CHUNK_SIZE,
            max_changes: crate::reconcile::DEFAULT_MAX_CHANGES,
            bump_serial: false,
            dry_run: false,
            tag: None,
        }
    }
}

/// Summary of a finished zone run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Zone name.
    pub zone: String,
    /// Serial seen when the run started.
    pub serial: u64,
    /// Edited serial seen when the run started.
    pub edited_serial: u64,
    /// Names in the desired state after layering.
    pub desired: usize,
    /// Names served before the run.
    pub current: usize,
    /// Removals in the change set.
    pub removals: usize,
    /// Replacements in the change set.
    pub replacements: usize,
    /// Entries dropped by the cap.
    pub truncated: Truncation,
    /// What was applied; `None` for dry runs.
    pub applied: Option<ApplyReport>,
    /// Final phase.
    pub phase: Phase,
}

/// Reconciles one zone.
pub struct ZoneSync<'a, C: ZoneReader + ZoneTransport + ?Sized> {
    zone: String,
    client: &'a C,
    overrides: StaticOverrides,
    options: SyncOptions,
}

impl<'a, C: ZoneReader + ZoneTransport + ?Sized> ZoneSync<'a, C> {
    /// Create a run for `zone` against `client`.
    pub fn new(zone: &str, client: &'a C, overrides: StaticOverrides, options: SyncOptions) -> Self {
        Self {
            zone: crate::record::normalize_fqdn(zone),
            client,
            overrides,
            options,
        }
    }

    /// Run against `derived`, stamping the tag (if enabled) with the current time.
    pub async fn run(&self, derived: &ZoneRecords) -> Result<SyncReport, SyncError> {
        self.run_at(derived, Utc::now()).await
    }

    /// Run against `derived`, stamping the tag (if enabled) with `now`.
    pub async fn run_at(
        &self,
        derived: &ZoneRecords,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let timer = Timer::start();
        let mut phase = Phase::FetchCurrent;

        let result = self.run_phases(derived, now, &mut phase).await;

        match &result {
            Ok(report) => {
                info!(
                    zone = %self.zone,
                    removals = report.removals,
                    replacements = report.replacements,
                    dry_run = self.options.dry_run,
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    "zone sync done"
                );
                metrics::record_run(&self.zone, RunOutcome::Done, timer.elapsed());
            }
            Err(e) => {
                error!(zone = %self.zone, %phase, error = %e, "zone sync failed");
                metrics::record_run(&self.zone, RunOutcome::Failed(phase), timer.elapsed());
            }
        }
        result
    }

    async fn run_phases(
        &self,
        derived: &ZoneRecords,
        now: DateTime<Utc>,
        phase: &mut Phase,
    ) -> Result<SyncReport, SyncError> {
        debug!(zone = %self.zone, phase = %Phase::FetchCurrent, "entering phase");
        let snapshot = self.client.fetch_zone().await?;

        *phase = Phase::ComputeDiff;
        debug!(zone = %self.zone, phase = %Phase::ComputeDiff, "entering phase");
        let tag = self.tag_record(now);
        let desired = layer_desired(
            derived,
            &self.overrides,
            tag.as_ref().map(|(name, record)| (name.as_str(), record)),
        );
        let changes = Reconciler::new(self.options.max_changes).diff_collapsing(
            &desired,
            &snapshot.records,
            &self.overrides,
            &snapshot.multi_valued,
        );
        metrics::record_changes(&self.zone, changes.removals.len(), changes.replacements.len());
        info!(
            zone = %self.zone,
            desired = desired.len(),
            current = snapshot.records.len(),
            removals = changes.removals.len(),
            replacements = changes.replacements.len(),
            "computed change set"
        );

        let applied = if self.options.dry_run {
            for (name, record) in changes.removals.iter() {
                info!(zone = %self.zone, name, %record, "dry run: would delete");
            }
            for (name, record) in changes.replacements.iter() {
                info!(zone = %self.zone, name, %record, "dry run: would replace");
            }
            None
        } else {
            *phase = Phase::ApplyRemovals;
            let applier = PatchApplier::new(self.client, self.zone.clone())
                .chunk_size(self.options.chunk_size)
                .bump_serial(self.options.bump_serial);
            match applier.apply(&changes).await {
                Ok(report) => Some(report),
                Err(e) => {
                    if let SyncError::Patch(failure) = &e {
                        *phase = failure.phase;
                    }
                    return Err(e);
                }
            }
        };

        *phase = Phase::Done;
        Ok(SyncReport {
            zone: self.zone.clone(),
            serial: snapshot.serial,
            edited_serial: snapshot.edited_serial,
            desired: desired.len(),
            current: snapshot.records.len(),
            removals: changes.removals.len(),
            replacements: changes.replacements.len(),
            truncated: changes.truncated,
            applied,
            phase: *phase,
        })
    }

    fn tag_record(&self, now: DateTime<Utc>) -> Option<(String, ResourceRecord)> {
        let tag = self.options.tag.as_ref()?;
        let name = qualify(&tag.name, &self.zone);
        let content = format!(
            "\"hamip-sync {}\"",
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        Some((name, ResourceRecord::txt(content, tag.ttl)))
    }
}
