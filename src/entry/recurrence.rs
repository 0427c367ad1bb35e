//! Monthly-recurrence expansion and removal-scope handling.
//!
//! The engine only computes which occurrences should exist; the store owns
//! every materialized entry. Expansion is idempotent: indices already present
//! or deliberately excluded are never synthesized again.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use super::entry::{fresh_id, Entry, Recurrence, Termination};

const MAX_EXPANSION_OCCURRENCES: usize = 1024;

/// How a removal applies to the rest of a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalScope {
    /// Remove only this occurrence; its index becomes excluded on the series.
    Single,
    /// Remove this occurrence and everything after it, truncating termination.
    Future,
    /// Remove every materialized entry of the series.
    Series,
}

struct SeriesState<'a> {
    template: &'a Entry,
    rule: &'a Recurrence,
    materialized: BTreeSet<u32>,
    excluded: BTreeSet<u32>,
}

/// Synthesizes the occurrences every recurring series is missing up to
/// `target`. Returned entries carry fresh ids and `updated_at = now`; the
/// caller appends them and re-sorts.
pub fn expand_to(entries: &[Entry], target: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Entry> {
    let mut series: HashMap<&str, SeriesState<'_>> = HashMap::new();
    for entry in entries {
        let Some(rule) = entry.recurrence.as_ref() else {
            continue;
        };
        let state = series
            .entry(rule.recurrence_id.as_str())
            .or_insert_with(|| SeriesState {
                template: entry,
                rule,
                materialized: BTreeSet::new(),
                excluded: BTreeSet::new(),
            });
        state.materialized.insert(rule.occurrence_index);
        state.excluded.extend(rule.excluded_occurrences.iter().copied());
        if rule.occurrence_index < state.rule.occurrence_index {
            state.template = entry;
            state.rule = rule;
        }
    }

    let mut additions = Vec::new();
    for state in series.values() {
        let distance = month_distance(state.rule.anchor_date, target);
        if distance < 0 {
            continue;
        }
        let mut max_index = distance as u32;
        if let Some(bound) = state.rule.max_materializable_index() {
            max_index = max_index.min(bound);
        }
        for index in 0..=max_index {
            if state.materialized.contains(&index) || state.excluded.contains(&index) {
                continue;
            }
            additions.push(synthesize(state, index, now));
            if additions.len() >= MAX_EXPANSION_OCCURRENCES {
                tracing::warn!(
                    limit = MAX_EXPANSION_OCCURRENCES,
                    "recurrence expansion truncated at occurrence cap"
                );
                return additions;
            }
        }
    }
    additions
}

fn synthesize(state: &SeriesState<'_>, index: u32, now: DateTime<Utc>) -> Entry {
    let rule = state.rule;
    Entry {
        id: fresh_id(),
        amount: state.template.amount,
        date: shift_months(rule.anchor_date, index),
        kind: state.template.kind,
        description: state.template.description.clone(),
        updated_at: Some(now),
        recurrence: Some(Recurrence {
            recurrence_id: rule.recurrence_id.clone(),
            anchor_date: rule.anchor_date,
            occurrence_index: index,
            frequency: rule.frequency,
            termination: rule.termination,
            excluded_occurrences: state.excluded.iter().copied().collect(),
        }),
    }
}

/// Applies a removal scope to the entry set. Returns false when the id is
/// unknown. A non-recurring entry ignores the scope and is deleted outright.
pub fn remove_with_scope(entries: &mut Vec<Entry>, id: &str, scope: RemovalScope) -> bool {
    let Some(position) = entries.iter().position(|entry| entry.id == id) else {
        return false;
    };
    let Some(rule) = entries[position].recurrence.clone() else {
        entries.remove(position);
        return true;
    };
    let series_id = rule.recurrence_id.clone();
    match scope {
        RemovalScope::Single => {
            entries.remove(position);
            for sibling in entries.iter_mut() {
                if sibling.series_id() == Some(series_id.as_str()) {
                    if let Some(sibling_rule) = sibling.recurrence.as_mut() {
                        sibling_rule.exclude(rule.occurrence_index);
                    }
                }
            }
        }
        RemovalScope::Future if rule.occurrence_index > 0 => {
            let cutoff = rule.occurrence_index;
            entries.retain(|entry| {
                entry.series_id() != Some(series_id.as_str())
                    || entry.occurrence_index().map_or(true, |index| index < cutoff)
            });
            for sibling in entries.iter_mut() {
                if sibling.series_id() == Some(series_id.as_str()) {
                    if let Some(sibling_rule) = sibling.recurrence.as_mut() {
                        sibling_rule.termination = Termination::Occurrences { total: cutoff };
                        sibling_rule.excluded_occurrences.retain(|&index| index < cutoff);
                    }
                }
            }
        }
        RemovalScope::Future | RemovalScope::Series => {
            entries.retain(|entry| entry.series_id() != Some(series_id.as_str()));
        }
    }
    true
}

/// Whole months between two instants using UTC year/month arithmetic; day and
/// time-of-day are ignored.
pub fn month_distance(from: DateTime<Utc>, to: DateTime<Utc>) -> i32 {
    let from_index = from.year() * 12 + from.month0() as i32;
    let to_index = to.year() * 12 + to.month0() as i32;
    to_index - from_index
}

/// Shifts an instant forward by whole months, preserving time-of-day and
/// clamping the day to the target month's last day.
pub fn shift_months(instant: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let mut year = instant.year();
    let mut month = instant.month() as i32 + months as i32;
    while month > 12 {
        month -= 12;
        year += 1;
    }
    let day = instant.day().min(days_in_month(year, month as u32));
    let date = NaiveDate::from_ymd_opt(year, month as u32, day)
        .unwrap_or_else(|| instant.date_naive());
    Utc.from_utc_datetime(&date.and_time(instant.time()))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };
    let first_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 28).unwrap());
    (first_next - Duration::days(1)).day()
}
