//! Diff calculation between consecutive snapshots.
//!
//! A record is new when its id does not appear in the stored snapshot.
//! Only additions matter here: a record missing from the latest window has
//! simply scrolled out of it, so removals are never reported.

use std::collections::HashSet;

use crate::models::ActivityRecord;

/// Records found only in the current snapshot.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// New records, in the current snapshot's order (newest first)
    pub added: Vec<ActivityRecord>,
    /// Current records skipped because they had no usable id
    pub malformed: usize,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Calculate which records in `current` are absent from `previous`.
///
/// Pure; an empty `current` always yields no additions.
pub fn calculate_diff(previous: &[ActivityRecord], current: &[ActivityRecord]) -> DiffResult {
    let known: HashSet<&str> = previous
        .iter()
        .filter(|r| r.check().is_ok())
        .map(|r| r.id.as_str())
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut result = DiffResult::default();

    for record in current {
        if let Err(e) = record.check() {
            log::warn!("Skipping record in diff: {}", e);
            result.malformed += 1;
            continue;
        }
        let id = record.id.as_str();
        if known.contains(id) || !seen.insert(id) {
            continue;
        }
        result.added.push(record.clone());
    }

    result
}

/// Convenience wrapper returning only the new records.
pub fn new_records(previous: &[ActivityRecord], current: &[ActivityRecord]) -> Vec<ActivityRecord> {
    calculate_diff(previous, current).added
}
