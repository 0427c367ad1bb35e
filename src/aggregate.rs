//! Monthly totals and history summaries.
//!
//! Month boundaries are evaluated in a fixed reference timezone so grouping is
//! stable no matter where the client runs; it is deliberately not UTC and not
//! the host zone.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryKind};

/// Timezone used for every "same month" decision.
pub const REFERENCE_TZ: Tz = chrono_tz::Europe::Lisbon;

/// Income, expense, and balance for one calendar month. Derived on demand,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub month: u32,
    pub year: i32,
    pub total_income: i64,
    pub total_expense: i64,
    pub total_balance: i64,
}

/// Calendar month of an instant in the reference timezone.
pub fn month_key(instant: DateTime<Utc>) -> (i32, u32) {
    let local = instant.with_timezone(&REFERENCE_TZ);
    (local.year(), local.month())
}

/// Entries whose date falls in the same reference-timezone month as
/// `reference`, preserving input order.
pub fn filter_by_month(entries: &[Entry], reference: DateTime<Utc>) -> Vec<Entry> {
    let key = month_key(reference);
    entries
        .iter()
        .filter(|entry| month_key(entry.date) == key)
        .cloned()
        .collect()
}

/// Entries dated on the same reference-timezone day as `reference`.
pub fn filter_by_day(entries: &[Entry], reference: DateTime<Utc>) -> Vec<Entry> {
    let day = reference.with_timezone(&REFERENCE_TZ).date_naive();
    entries
        .iter()
        .filter(|entry| entry.date.with_timezone(&REFERENCE_TZ).date_naive() == day)
        .cloned()
        .collect()
}

/// Sum of amounts for one kind within the reference month. An empty month
/// sums to 0.
pub fn monthly_total_for_kind(entries: &[Entry], kind: EntryKind, reference: DateTime<Utc>) -> i64 {
    let key = month_key(reference);
    entries
        .iter()
        .filter(|entry| entry.kind == kind && month_key(entry.date) == key)
        .map(|entry| entry.amount)
        .sum()
}

pub fn monthly_balance(entries: &[Entry], reference: DateTime<Utc>) -> i64 {
    monthly_total_for_kind(entries, EntryKind::Income, reference)
        - monthly_total_for_kind(entries, EntryKind::Expense, reference)
}

/// Per-month summaries over the whole entry set, most recent month first.
pub fn months_history(entries: &[Entry]) -> Vec<MonthSummary> {
    let mut summaries: Vec<MonthSummary> = Vec::new();
    for entry in entries {
        let (year, month) = month_key(entry.date);
        let position = summaries
            .iter()
            .position(|s| s.year == year && s.month == month)
            .unwrap_or_else(|| {
                summaries.push(MonthSummary {
                    month,
                    year,
                    total_income: 0,
                    total_expense: 0,
                    total_balance: 0,
                });
                summaries.len() - 1
            });
        let summary = &mut summaries[position];
        match entry.kind {
            EntryKind::Income => summary.total_income += entry.amount,
            EntryKind::Expense => summary.total_expense += entry.amount,
        }
    }
    for summary in summaries.iter_mut() {
        summary.total_balance = summary.total_income - summary.total_expense;
    }
    summaries.sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
    summaries
}
