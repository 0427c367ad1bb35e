//! Repairs raw persisted or imported records into canonical entries.
//!
//! Restoration from persistence is best-effort: every field that cannot be
//! used as-is gets a deterministic substitute and the result is flagged so the
//! caller can rewrite storage. Explicit imports reuse the same rules but treat
//! any needed repair as fatal (see `store::import`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use super::entry::{fresh_id, Entry, EntryKind, Frequency, Recurrence, Termination};

/// Outcome of normalizing one raw record.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub entry: Entry,
    /// True when any field required repair and storage should be rewritten.
    pub requires_resync: bool,
}

/// Converts a raw JSON record into a canonical entry, or `None` when the
/// value is not object-shaped.
pub fn normalize(raw: &Value, now: DateTime<Utc>) -> Option<Normalized> {
    let object = raw.as_object()?;
    let mut resync = false;

    let amount = match object.get("amount") {
        Some(Value::Number(number)) => {
            if let Some(integral) = number.as_i64() {
                integral
            } else if let Some(float) = number.as_f64() {
                if float.is_finite() {
                    resync = true;
                    float.trunc() as i64
                } else {
                    resync = true;
                    0
                }
            } else {
                resync = true;
                0
            }
        }
        Some(Value::String(text)) => {
            resync = true;
            parse_leading_int(text).unwrap_or(0)
        }
        Some(other) => {
            resync = true;
            parse_leading_int(&other.to_string()).unwrap_or(0)
        }
        None => {
            resync = true;
            0
        }
    };

    let date = match object.get("date").and_then(Value::as_str).and_then(parse_instant) {
        Some(instant) => instant,
        None => {
            resync = true;
            now
        }
    };

    let kind = match object.get("type").and_then(Value::as_str) {
        Some("expense") => EntryKind::Expense,
        Some("income") => EntryKind::Income,
        Some(other) if other.eq_ignore_ascii_case("expense") => {
            resync = true;
            EntryKind::Expense
        }
        Some(other) if other.eq_ignore_ascii_case("income") => {
            resync = true;
            EntryKind::Income
        }
        _ => {
            resync = true;
            EntryKind::Expense
        }
    };

    let description = match object.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(_) => {
            resync = true;
            None
        }
    };

    let id = match object.get("id").and_then(Value::as_str) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => {
            resync = true;
            fresh_id()
        }
    };

    let updated_at = match object.get("updatedAt") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_str().and_then(parse_instant) {
            Some(instant) => Some(instant),
            None => {
                resync = true;
                Some(now)
            }
        },
    };

    let recurrence = match object.get("recurrence") {
        None | Some(Value::Null) => None,
        Some(value) => match normalize_recurrence(value) {
            Some(recurrence) => Some(recurrence),
            None => {
                resync = true;
                None
            }
        },
    };

    Some(Normalized {
        entry: Entry {
            id,
            amount,
            date,
            kind,
            description,
            updated_at,
            recurrence,
        },
        requires_resync: resync,
    })
}

/// Validates recurrence metadata; an invalid payload yields `None` and the
/// owning entry becomes non-recurring.
pub fn normalize_recurrence(raw: &Value) -> Option<Recurrence> {
    let object = raw.as_object()?;

    let recurrence_id = match object.get("recurrenceId").and_then(Value::as_str) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => return None,
    };

    let anchor_date = object
        .get("anchorDate")
        .and_then(Value::as_str)
        .and_then(parse_instant)?;

    let occurrence_index = non_negative_index(object.get("occurrenceIndex")?)?;

    let frequency = match object.get("frequency") {
        None => Frequency::Monthly,
        Some(value) => match value.as_str() {
            Some(text) if text.eq_ignore_ascii_case("monthly") => Frequency::Monthly,
            _ => return None,
        },
    };

    let termination = match object.get("termination") {
        None | Some(Value::Null) => Termination::Indefinite,
        Some(value) => normalize_termination(value)?,
    };

    let excluded_occurrences = match object.get("excludedOccurrences") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut indices = Vec::with_capacity(items.len());
            for item in items {
                indices.push(non_negative_index(item)?);
            }
            indices.sort_unstable();
            indices.dedup();
            indices
        }
        Some(_) => return None,
    };

    Some(Recurrence {
        recurrence_id,
        anchor_date,
        occurrence_index,
        frequency,
        termination,
        excluded_occurrences,
    })
}

fn normalize_termination(raw: &Value) -> Option<Termination> {
    let object = raw.as_object()?;
    match object.get("mode").and_then(Value::as_str)? {
        "indefinite" => Some(Termination::Indefinite),
        "occurrences" => {
            let total = non_negative_index(object.get("total")?)?;
            if total == 0 {
                return None;
            }
            Some(Termination::Occurrences { total })
        }
        _ => None,
    }
}

fn non_negative_index(raw: &Value) -> Option<u32> {
    if !raw.is_number() {
        return None;
    }
    if let Some(integral) = raw.as_u64() {
        return u32::try_from(integral).ok();
    }
    let float = raw.as_f64()?;
    if float.is_finite() && float >= 0.0 && float.fract() == 0.0 && float <= u32::MAX as f64 {
        Some(float as u32)
    } else {
        None
    }
}

/// Parses a timestamp string, accepting RFC 3339 and the bare date / naive
/// datetime forms older exports used. Naive values are read as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Base-10 integer prefix parse mirroring how the legacy client read string
/// amounts: sign plus leading digits, anything after them discarded.
fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let span = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if span == 0 {
        return None;
    }
    let value: i64 = digits[..span].parse().ok()?;
    Some(if negative { -value } else { value })
}
