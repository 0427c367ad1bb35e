use chrono::{DateTime, Utc};

use crate::entry::Entry;

/// Counters describing one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Reconciles a local entry set with an imported one, keyed by id. Identical
/// records are kept local; conflicting records resolve by `updated_at`
/// recency, a missing timestamp losing to any present one. The imported side
/// is counted `updated` whenever the records differ, regardless of the winner.
pub fn merge_entries(local: &[Entry], imported: &[Entry]) -> (Vec<Entry>, MergeOutcome) {
    let mut merged: Vec<Entry> = local.to_vec();
    let mut outcome = MergeOutcome::default();

    for incoming in imported {
        match merged.iter_mut().find(|entry| entry.id == incoming.id) {
            None => {
                merged.push(incoming.clone());
                outcome.added += 1;
            }
            Some(existing) => {
                if existing.fields_match(incoming) {
                    outcome.skipped += 1;
                } else {
                    if recency(incoming.updated_at) > recency(existing.updated_at) {
                        *existing = incoming.clone();
                    }
                    outcome.updated += 1;
                }
            }
        }
    }

    (merged, outcome)
}

/// Absent timestamps are treated as older than any present one.
fn recency(updated_at: Option<DateTime<Utc>>) -> (bool, DateTime<Utc>) {
    match updated_at {
        Some(instant) => (true, instant),
        None => (false, DateTime::<Utc>::MIN_UTC),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use chrono::TimeZone;

    fn instant(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn entry(id: &str, amount: i64) -> Entry {
        let mut entry = Entry::new(amount, instant(2024, 1, 10), EntryKind::Expense);
        entry.id = id.into();
        entry
    }

    #[test]
    fn merging_a_set_with_itself_skips_everything() {
        let set = vec![entry("a", 100), entry("b", 200)];
        let (merged, outcome) = merge_entries(&set, &set);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            outcome,
            MergeOutcome {
                added: 0,
                updated: 0,
                skipped: 2
            }
        );
    }

    #[test]
    fn unknown_ids_are_added() {
        let local = vec![entry("a", 100)];
        let imported = vec![entry("b", 50)];
        let (merged, outcome) = merge_entries(&local, &imported);
        assert_eq!(merged.len(), 2);
        assert_eq!(outcome.added, 1);
    }

    #[test]
    fn imported_with_timestamp_beats_local_without() {
        let local = vec![entry("a", 100)];
        let mut incoming = entry("a", 175);
        incoming.updated_at = Some(instant(2024, 2, 1));
        let (merged, outcome) = merge_entries(&local, &[incoming]);
        assert_eq!(outcome.updated, 1);
        assert_eq!(merged[0].amount, 175);
    }

    #[test]
    fn newer_local_survives_but_still_counts_updated() {
        let mut local_entry = entry("a", 100);
        local_entry.updated_at = Some(instant(2024, 3, 1));
        let mut incoming = entry("a", 175);
        incoming.updated_at = Some(instant(2024, 2, 1));
        let (merged, outcome) = merge_entries(&[local_entry], &[incoming]);
        assert_eq!(outcome.updated, 1);
        assert_eq!(merged[0].amount, 100);
    }
}
