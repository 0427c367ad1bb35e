use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};

use chrono::{DateTime, Utc};

use crate::aggregate::{self, MonthSummary};
use crate::config::Config;
use crate::entry::{
    expand_to, normalize, remove_with_scope, Entry, EntryKind, Recurrence, RemovalScope,
    Termination,
};
use crate::errors::{CoreError, Result};
use crate::storage::KeyValueStore;

use super::import::{export_json, extract_records, parse_document, strict_normalize};
use super::merge::{merge_entries, MergeOutcome};

/// Key under which the canonical entry array lives in the collaborator.
pub const ENTRIES_KEY: &str = "entries";

/// Injectable time source so expansion and normalization stay deterministic
/// under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real-time clock backed by the system UTC time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Outcome of restoring the entry set from persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Records that required repair (or were dropped) and forced a rewrite.
    pub healed: usize,
}

/// User-supplied fields for a brand new entry. A termination value makes the
/// entry the anchor (index 0) of a new monthly series.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub kind: EntryKind,
    pub description: Option<String>,
    pub recurrence: Option<Termination>,
}

/// Partial update; `description: Some(None)` clears the field.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub amount: Option<i64>,
    pub date: Option<DateTime<Utc>>,
    pub kind: Option<EntryKind>,
    pub description: Option<Option<String>>,
}

enum PendingTask {
    Expand { target: DateTime<Utc> },
}

/// Owns every entry instance. Mutations schedule a recurrence expansion that
/// runs on the next flush; every read flushes first, so observers of the API
/// never see a snapshot that lags behind elapsed time.
pub struct EntryStore {
    entries: Vec<Entry>,
    storage: Box<dyn KeyValueStore>,
    clock: Box<dyn Clock>,
    config: Config,
    observers: Vec<Sender<Vec<Entry>>>,
    pending: VecDeque<PendingTask>,
    last_load: LoadReport,
}

impl EntryStore {
    /// Restores the entry set from the collaborator with the default
    /// configuration.
    pub fn open(storage: Box<dyn KeyValueStore>, clock: Box<dyn Clock>) -> Result<Self> {
        Self::open_with_config(storage, clock, Config::default())
    }

    /// Restores the entry set from the collaborator. Malformed records are
    /// repaired or dropped, never fatal; when anything needed healing and
    /// `config.self_heal_on_load` is set, the canonical set is written
    /// straight back.
    pub fn open_with_config(
        storage: Box<dyn KeyValueStore>,
        clock: Box<dyn Clock>,
        config: Config,
    ) -> Result<Self> {
        let mut store = Self {
            entries: Vec::new(),
            storage,
            clock,
            config,
            observers: Vec::new(),
            pending: VecDeque::new(),
            last_load: LoadReport::default(),
        };
        let mut healed = 0usize;
        if let Some(text) = store.storage.get(ENTRIES_KEY)? {
            match parse_document(&text) {
                Ok(document) => {
                    let records = document.as_array().cloned().unwrap_or_else(|| {
                        healed += 1;
                        Vec::new()
                    });
                    let now = store.clock.now();
                    let mut seen: HashSet<String> = HashSet::new();
                    for record in &records {
                        match normalize(record, now) {
                            Some(normalized) => {
                                if normalized.requires_resync {
                                    healed += 1;
                                }
                                if !seen.insert(normalized.entry.id.clone()) {
                                    healed += 1;
                                    continue;
                                }
                                store.entries.push(normalized.entry);
                            }
                            None => healed += 1,
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "persisted entries unreadable, starting empty");
                    healed += 1;
                }
            }
        }
        store.sort_entries();
        store.last_load = LoadReport {
            loaded: store.entries.len(),
            healed,
        };
        if healed > 0 {
            tracing::info!(healed, "self-healed persisted entries");
            if store.config.self_heal_on_load {
                store.persist()?;
            }
        }
        let now = store.clock.now();
        store.schedule_expand(now);
        Ok(store)
    }

    pub fn last_load(&self) -> LoadReport {
        self.last_load
    }

    /// Registers an observer; each persisted change delivers a full snapshot.
    pub fn subscribe(&mut self) -> Receiver<Vec<Entry>> {
        let (sender, receiver) = channel();
        self.observers.push(sender);
        receiver
    }

    pub fn add(&mut self, creation: NewEntry) -> Result<String> {
        if let Some(Termination::Occurrences { total: 0 }) = creation.recurrence {
            return Err(CoreError::Validation(
                "a bounded series needs at least one occurrence".into(),
            ));
        }
        let now = self.clock.now();
        let mut entry = Entry::new(creation.amount, creation.date, creation.kind);
        entry.description = normalize_description(creation.description);
        entry.updated_at = Some(now);
        if let Some(termination) = creation.recurrence {
            entry.recurrence = Some(Recurrence::new(creation.date, termination));
        }
        let id = entry.id.clone();
        self.entries.push(entry);
        self.sort_entries();
        self.schedule_expand(now);
        self.persist()?;
        Ok(id)
    }

    /// Applies a partial update. Returns false, without bumping `updated_at`,
    /// when the id is unknown or the patched result is field-identical.
    pub fn update(&mut self, id: &str, patch: EntryPatch) -> Result<bool> {
        let Some(position) = self.entries.iter().position(|entry| entry.id == id) else {
            return Ok(false);
        };
        let current = &self.entries[position];
        let amount = patch.amount.unwrap_or(current.amount);
        let date = patch.date.unwrap_or(current.date);
        let kind = patch.kind.unwrap_or(current.kind);
        let description = match patch.description {
            Some(value) => normalize_description(value),
            None => current.description.clone(),
        };
        if amount == current.amount
            && date == current.date
            && kind == current.kind
            && description == current.description
        {
            return Ok(false);
        }
        let now = self.clock.now();
        let entry = &mut self.entries[position];
        entry.amount = amount;
        entry.date = date;
        entry.kind = kind;
        entry.description = description;
        entry.updated_at = Some(now);
        self.sort_entries();
        self.schedule_expand(now);
        self.persist()?;
        Ok(true)
    }

    /// Removes an entry under the given scope; a non-recurring entry is
    /// deleted outright whatever the scope says.
    pub fn remove(&mut self, id: &str, scope: RemovalScope) -> Result<bool> {
        if !remove_with_scope(&mut self.entries, id, scope) {
            return Ok(false);
        }
        let now = self.clock.now();
        self.schedule_expand(now);
        self.persist()?;
        Ok(true)
    }

    /// Replaces the whole entry set from an import document. All-or-nothing:
    /// any malformed record rejects the payload and local data is untouched.
    pub fn import_replace(&mut self, text: &str) -> Result<usize> {
        let document = parse_document(text)?;
        let records = extract_records(&document)?;
        let now = self.clock.now();
        let imported = strict_normalize(records, now)?;
        ensure_unique_ids(&imported)?;
        self.entries = imported;
        self.sort_entries();
        self.schedule_expand(now);
        self.persist()?;
        tracing::info!(count = self.entries.len(), "import replaced entry set");
        Ok(self.entries.len())
    }

    /// Remote-sync hook: reconciles an exported snapshot into the local set.
    pub fn ingest_remote(&mut self, text: &str) -> Result<MergeOutcome> {
        let document = parse_document(text)?;
        let records = extract_records(&document)?;
        let now = self.clock.now();
        let imported = strict_normalize(records, now)?;
        let (merged, outcome) = merge_entries(&self.entries, &imported);
        self.entries = merged;
        self.sort_entries();
        self.schedule_expand(now);
        self.persist()?;
        tracing::info!(
            added = outcome.added,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "merged remote snapshot"
        );
        Ok(outcome)
    }

    /// Remote-sync hook: current snapshot as the export wire format.
    pub fn serialize(&mut self) -> Result<String> {
        let now = self.clock.now();
        self.expand_for_reference(now)?;
        export_json(&self.entries)
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.entries.clear();
        self.pending.clear();
        self.persist()
    }

    pub fn snapshot(&mut self) -> Result<Vec<Entry>> {
        let now = self.clock.now();
        self.expand_for_reference(now)?;
        Ok(self.entries.clone())
    }

    pub fn filter_by_month(&mut self, reference: DateTime<Utc>) -> Result<Vec<Entry>> {
        self.expand_for_reference(reference)?;
        Ok(aggregate::filter_by_month(&self.entries, reference))
    }

    pub fn filter_by_day(&mut self, reference: DateTime<Utc>) -> Result<Vec<Entry>> {
        self.expand_for_reference(reference)?;
        Ok(aggregate::filter_by_day(&self.entries, reference))
    }

    pub fn monthly_income(&mut self, reference: DateTime<Utc>) -> Result<i64> {
        self.expand_for_reference(reference)?;
        Ok(aggregate::monthly_total_for_kind(
            &self.entries,
            EntryKind::Income,
            reference,
        ))
    }

    pub fn monthly_expense(&mut self, reference: DateTime<Utc>) -> Result<i64> {
        self.expand_for_reference(reference)?;
        Ok(aggregate::monthly_total_for_kind(
            &self.entries,
            EntryKind::Expense,
            reference,
        ))
    }

    pub fn monthly_balance(&mut self, reference: DateTime<Utc>) -> Result<i64> {
        self.expand_for_reference(reference)?;
        Ok(aggregate::monthly_balance(&self.entries, reference))
    }

    pub fn months_history(&mut self) -> Result<Vec<MonthSummary>> {
        let now = self.clock.now();
        self.expand_for_reference(now)?;
        Ok(aggregate::months_history(&self.entries))
    }

    /// Runs every scheduled expansion. Reads call this implicitly; tests call
    /// it directly to drain the queue deterministically.
    pub fn flush_pending(&mut self) -> Result<()> {
        while let Some(task) = self.pending.pop_front() {
            match task {
                PendingTask::Expand { target } => {
                    let additions = expand_to(&self.entries, target, self.clock.now());
                    if !additions.is_empty() {
                        tracing::debug!(count = additions.len(), "materialized recurring occurrences");
                        self.entries.extend(additions);
                        self.sort_entries();
                        self.persist()?;
                    }
                }
            }
        }
        Ok(())
    }

    fn expand_for_reference(&mut self, reference: DateTime<Utc>) -> Result<()> {
        let target = reference.max(self.clock.now());
        self.schedule_expand(target);
        self.flush_pending()
    }

    fn schedule_expand(&mut self, target: DateTime<Utc>) {
        let covered = self.pending.iter().any(|task| {
            let PendingTask::Expand { target: existing } = task;
            *existing >= target
        });
        if !covered {
            self.pending.push_back(PendingTask::Expand { target });
        }
    }

    /// Single choke point for state changes: writes the collaborator, then
    /// notifies observers with the fresh snapshot.
    fn persist(&mut self) -> Result<()> {
        let json = export_json(&self.entries)?;
        self.storage.set(ENTRIES_KEY, &json)?;
        tracing::debug!(count = self.entries.len(), "persisted entry set");
        let snapshot = self.entries.clone();
        self.observers
            .retain(|observer| observer.send(snapshot.clone()).is_ok());
        Ok(())
    }

    fn sort_entries(&mut self) {
        self.entries
            .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    }
}

fn normalize_description(description: Option<String>) -> Option<String> {
    let text = description?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn ensure_unique_ids(entries: &[Entry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(CoreError::Import(format!(
                "duplicate entry id `{}`",
                entry.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn at(instant: DateTime<Utc>) -> Self {
            Self(Mutex::new(instant))
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn instant(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn store_at(now: DateTime<Utc>) -> EntryStore {
        EntryStore::open(
            Box::new(MemoryStore::new()),
            Box::new(FixedClock::at(now)),
        )
        .expect("open store")
    }

    #[test]
    fn add_defers_expansion_until_flush() {
        let mut store = store_at(instant(2024, 4, 20));
        store
            .add(NewEntry {
                amount: 1500,
                date: instant(2024, 1, 15),
                kind: EntryKind::Expense,
                description: Some("rent".into()),
                recurrence: Some(Termination::Indefinite),
            })
            .unwrap();
        // The anchor is persisted immediately; occurrences wait for the flush.
        assert_eq!(store.entries.len(), 1);
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.len(), 4);
    }

    #[test]
    fn update_is_a_noop_for_identical_fields() {
        let mut store = store_at(instant(2024, 2, 1));
        let id = store
            .add(NewEntry {
                amount: 700,
                date: instant(2024, 2, 1),
                kind: EntryKind::Income,
                description: Some("salary".into()),
                recurrence: None,
            })
            .unwrap();
        let before = store.snapshot().unwrap()[0].updated_at;

        let unchanged = store
            .update(
                &id,
                EntryPatch {
                    amount: Some(700),
                    description: Some(Some("  salary  ".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!unchanged);
        assert_eq!(store.snapshot().unwrap()[0].updated_at, before);

        let changed = store
            .update(
                &id,
                EntryPatch {
                    amount: Some(750),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);
        assert_eq!(store.snapshot().unwrap()[0].amount, 750);
    }

    #[test]
    fn update_of_unknown_id_is_a_noop() {
        let mut store = store_at(instant(2024, 2, 1));
        assert!(!store.update("missing", EntryPatch::default()).unwrap());
    }

    #[test]
    fn failed_import_leaves_local_data_untouched() {
        let mut store = store_at(instant(2024, 2, 1));
        store
            .add(NewEntry {
                amount: 100,
                date: instant(2024, 2, 1),
                kind: EntryKind::Expense,
                description: None,
                recurrence: None,
            })
            .unwrap();

        let err = store
            .import_replace(r#"{"expenses":[{"amount":"1500.7","date":"not-a-date"}]}"#)
            .unwrap_err();
        assert!(matches!(err, CoreError::Import(_)));
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn observers_receive_snapshots_on_persist() {
        let mut store = store_at(instant(2024, 2, 1));
        let receiver = store.subscribe();
        store
            .add(NewEntry {
                amount: 100,
                date: instant(2024, 2, 1),
                kind: EntryKind::Expense,
                description: None,
                recurrence: None,
            })
            .unwrap();
        let snapshot = receiver.try_recv().expect("notification");
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn open_self_heals_malformed_records() {
        let storage = Box::new(MemoryStore::new());
        storage
            .set(
                ENTRIES_KEY,
                r#"[
                    {"id": "ok", "amount": 100, "date": "2024-01-10T00:00:00Z", "type": "expense"},
                    {"id": "fixme", "amount": "25", "date": "2024-01-11T00:00:00Z", "type": "EXPENSE"},
                    "not-an-object"
                ]"#,
            )
            .unwrap();

        let mut store = EntryStore::open(storage, Box::new(FixedClock::at(instant(2024, 1, 20))))
            .expect("open store");
        let report = store.last_load();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.healed, 2);

        // The rewrite is canonical: reopening heals nothing further.
        let text = store.serialize().unwrap();
        let storage = Box::new(MemoryStore::new());
        storage.set(ENTRIES_KEY, &text).unwrap();
        let reopened =
            EntryStore::open(storage, Box::new(FixedClock::at(instant(2024, 1, 20))))
                .expect("reopen store");
        assert_eq!(reopened.last_load().healed, 0);
    }

    #[test]
    fn disabling_self_heal_keeps_storage_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let raw = r#"[{"amount": "25", "date": "2024-01-11T00:00:00Z", "type": "EXPENSE"}]"#;
        std::fs::write(temp.path().join("entries.json"), raw).unwrap();

        let config = Config {
            self_heal_on_load: false,
            ..Config::default()
        };
        let store = EntryStore::open_with_config(
            Box::new(crate::storage::FileStore::open(Some(
                temp.path().to_path_buf(),
            ))),
            Box::new(FixedClock::at(instant(2024, 1, 20))),
            config,
        )
        .expect("open store");
        assert_eq!(store.last_load().healed, 1);

        // The record is repaired in memory but the rewrite is suppressed.
        let on_disk = std::fs::read_to_string(temp.path().join("entries.json")).unwrap();
        assert_eq!(on_disk, raw);
    }

    #[test]
    fn clear_all_empties_store_and_queue() {
        let mut store = store_at(instant(2024, 4, 1));
        store
            .add(NewEntry {
                amount: 10,
                date: instant(2024, 1, 1),
                kind: EntryKind::Expense,
                description: None,
                recurrence: Some(Termination::Indefinite),
            })
            .unwrap();
        store.clear_all().unwrap();
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn bounded_series_of_zero_is_rejected() {
        let mut store = store_at(instant(2024, 4, 1));
        let err = store
            .add(NewEntry {
                amount: 10,
                date: instant(2024, 1, 1),
                kind: EntryKind::Expense,
                description: None,
                recurrence: Some(Termination::Occurrences { total: 0 }),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
