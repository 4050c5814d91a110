//! Diff between the desired and the served record set.
//!
//! The desired set is built in layers, later layers winning on the same name:
//!
//! ```text
//! registry-derived  <  static overrides  <  sync tag
//! ```
//!
//! Static override names are also never proposed for removal, whether or not
//! they made it into the desired set.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::metrics;
use crate::overrides::StaticOverrides;
use crate::record::{ResourceRecord, ZoneRecords};

/// Default cap on removals and on replacements per run.
pub const DEFAULT_MAX_CHANGES: usize = 10_000;

/// Entries dropped by the change cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Truncation {
    /// Removal candidates beyond the cap.
    pub removals: usize,
    /// Replacement candidates beyond the cap.
    pub replacements: usize,
}

impl Truncation {
    /// True if nothing was dropped.
    pub fn is_none(&self) -> bool {
        self.removals == 0 && self.replacements == 0
    }
}

/// Operations that move the zone to the desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// RRsets to delete, keyed by name, with the served record (for its type).
    pub removals: ZoneRecords,
    /// RRsets to write, keyed by name, with the desired record.
    pub replacements: ZoneRecords,
    /// Entries left out because of the cap.
    pub truncated: Truncation,
}

impl ChangeSet {
    /// True if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.replacements.is_empty()
    }
}

/// Computes change sets with a per-side cap.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    max_changes: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHANGES)
    }
}

impl Reconciler {
    /// Create a reconciler that emits at most `max_changes` removals and
    /// at most `max_changes` replacements.
    pub fn new(max_changes: usize) -> Self {
        Self { max_changes }
    }

    /// Compute the changes that turn `current` into `desired`.
    ///
    /// A name served with a different record type than desired is both
    /// removed (old type) and replaced (new type).
    pub fn diff(
        &self,
        desired: &ZoneRecords,
        current: &ZoneRecords,
        overrides: &StaticOverrides,
    ) -> ChangeSet {
        self.diff_collapsing(desired, current, overrides, &BTreeSet::new())
    }

    /// [`Reconciler::diff`] for a zone where the names in `multi_valued` serve
    /// more than one record. Those are replaced whenever they are desired, so
    /// the RRset collapses to the single desired record.
    ///
    /// A type change is only emitted when its removal fits under the cap;
    /// otherwise the replacement waits for a later run.
    pub fn diff_collapsing(
        &self,
        desired: &ZoneRecords,
        current: &ZoneRecords,
        overrides: &StaticOverrides,
        multi_valued: &BTreeSet<String>,
    ) -> ChangeSet {
        let removal_candidates = current.iter().filter(|(name, served)| {
            match desired.get(name) {
                None => !overrides.contains(name),
                Some(wanted) => wanted.record_type != served.record_type,
            }
        });

        let replacement_candidates = desired.iter().filter(|(name, wanted)| {
            multi_valued.contains(*name)
                || !current
                    .get(name)
                    .is_some_and(|served| wanted.same_as(served))
        });

        let (removals, dropped_removals) = self.capped(removal_candidates);
        let (mut replacements, mut dropped_replacements) = self.capped(replacement_candidates);

        // The old RRset must go in the same run as the new type arrives.
        let unpaired: Vec<String> = replacements
            .iter()
            .filter(|(name, wanted)| {
                !removals.contains(name)
                    && current
                        .get(name)
                        .is_some_and(|served| served.record_type != wanted.record_type)
            })
            .map(|(name, _)| name.to_string())
            .collect();
        for name in &unpaired {
            debug!(name = %name, "type change deferred, removal beyond cap");
            replacements.remove(name);
        }
        dropped_replacements += unpaired.len();

        let truncated = Truncation {
            removals: dropped_removals,
            replacements: dropped_replacements,
        };
        if truncated.removals > 0 {
            warn!(
                kept = removals.len(),
                dropped = truncated.removals,
                cap = self.max_changes,
                "removal cap reached, remaining removals skipped"
            );
            metrics::record_truncation("removal", truncated.removals);
        }
        if truncated.replacements > 0 {
            warn!(
                kept = replacements.len(),
                dropped = truncated.replacements,
                cap = self.max_changes,
                "replacement cap reached, remaining replacements skipped"
            );
            metrics::record_truncation("replacement", truncated.replacements);
        }

        debug!(
            desired = desired.len(),
            current = current.len(),
            removals = removals.len(),
            replacements = replacements.len(),
            "computed change set"
        );

        ChangeSet {
            removals,
            replacements,
            truncated,
        }
    }

    fn capped<'a>(
        &self,
        candidates: impl Iterator<Item = (&'a str, &'a ResourceRecord)>,
    ) -> (ZoneRecords, usize) {
        let mut kept = ZoneRecords::new();
        let mut dropped = 0;
        for (name, record) in candidates {
            if kept.len() < self.max_changes {
                kept.set(name, record.clone());
            } else {
                dropped += 1;
            }
        }
        (kept, dropped)
    }
}

/// [`Reconciler::diff`] with the default cap.
pub fn reconcile(
    desired: &ZoneRecords,
    current: &ZoneRecords,
    overrides: &StaticOverrides,
) -> ChangeSet {
    Reconciler::default().diff(desired, current, overrides)
}

/// Build the desired set: derived records, then static overrides, then the
/// optional tag record, each layer replacing the previous one on a name clash.
pub fn layer_desired(
    derived: &ZoneRecords,
    overrides: &StaticOverrides,
    tag: Option<(&str, &ResourceRecord)>,
) -> ZoneRecords {
    let mut desired = derived.clone();
    for (name, record) in overrides.records().iter() {
        if let Some(replaced) = desired.set(name, record.clone()) {
            if !replaced.same_as(record) {
                debug!(name, derived = %replaced, static_record = %record, "static override wins");
            }
        }
    }
    if let Some((name, record)) = tag {
        desired.set(name, record.clone());
    }
    desired
}
