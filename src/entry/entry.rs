use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single income or expense record, the unit the store owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    /// Minor-unit currency amount, always integral.
    pub amount: i64,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
}

impl Entry {
    pub fn new(amount: i64, date: DateTime<Utc>, kind: EntryKind) -> Self {
        Self {
            id: fresh_id(),
            amount,
            date,
            kind,
            description: None,
            updated_at: None,
            recurrence: None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn series_id(&self) -> Option<&str> {
        self.recurrence.as_ref().map(|r| r.recurrence_id.as_str())
    }

    pub fn occurrence_index(&self) -> Option<u32> {
        self.recurrence.as_ref().map(|r| r.occurrence_index)
    }

    /// Compares the user-visible payload: amount, date, description, kind,
    /// and recurrence metadata. Ignores `id` and `updated_at`.
    pub fn fields_match(&self, other: &Entry) -> bool {
        self.amount == other.amount
            && self.date == other.date
            && self.description == other.description
            && self.kind == other.kind
            && self.recurrence == other.recurrence
    }
}

/// Generates an opaque unique identifier for a new entry or series.
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Expense,
    Income,
}

/// Metadata shared by every materialized occurrence of one recurring series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    pub recurrence_id: String,
    /// Instant of occurrence index 0.
    pub anchor_date: DateTime<Utc>,
    /// Position of this entry within the series.
    pub occurrence_index: u32,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub termination: Termination,
    /// Sorted, de-duplicated indices deliberately skipped by the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_occurrences: Vec<u32>,
}

impl Recurrence {
    pub fn new(anchor_date: DateTime<Utc>, termination: Termination) -> Self {
        Self {
            recurrence_id: fresh_id(),
            anchor_date,
            occurrence_index: 0,
            frequency: Frequency::Monthly,
            termination,
            excluded_occurrences: Vec::new(),
        }
    }

    pub fn is_excluded(&self, index: u32) -> bool {
        self.excluded_occurrences.binary_search(&index).is_ok()
    }

    pub fn exclude(&mut self, index: u32) {
        if let Err(pos) = self.excluded_occurrences.binary_search(&index) {
            self.excluded_occurrences.insert(pos, index);
        }
    }

    /// Highest occurrence index this series may ever materialize, if bounded.
    pub fn max_materializable_index(&self) -> Option<u32> {
        match self.termination {
            Termination::Indefinite => None,
            Termination::Occurrences { total } => Some(total.saturating_sub(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Monthly,
}

/// Bounds how many occurrences a series may ever produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Termination {
    #[default]
    Indefinite,
    Occurrences { total: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn exclude_keeps_indices_sorted_and_unique() {
        let mut recurrence = Recurrence::new(instant(2024, 1, 15), Termination::Indefinite);
        recurrence.exclude(4);
        recurrence.exclude(1);
        recurrence.exclude(4);
        assert_eq!(recurrence.excluded_occurrences, vec![1, 4]);
        assert!(recurrence.is_excluded(1));
        assert!(!recurrence.is_excluded(2));
    }

    #[test]
    fn fields_match_ignores_id_and_updated_at() {
        let mut a = Entry::new(1500, instant(2024, 3, 1), EntryKind::Expense);
        let mut b = a.clone();
        b.id = fresh_id();
        b.updated_at = Some(instant(2024, 3, 2));
        assert!(a.fields_match(&b));
        a.amount = 1600;
        assert!(!a.fields_match(&b));
    }

    #[test]
    fn serialization_uses_wire_names() {
        let mut entry = Entry::new(-250, instant(2024, 2, 10), EntryKind::Income);
        entry.recurrence = Some(Recurrence::new(
            instant(2024, 2, 10),
            Termination::Occurrences { total: 3 },
        ));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "income");
        let recurrence = &value["recurrence"];
        assert!(recurrence["recurrenceId"].is_string());
        assert_eq!(recurrence["occurrenceIndex"], 0);
        assert_eq!(recurrence["termination"]["mode"], "occurrences");
        assert_eq!(recurrence["termination"]["total"], 3);
    }
}
