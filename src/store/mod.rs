//! Authoritative entry collection: mutations, deferred recurrence expansion,
//! persistence choke point, and remote reconciliation.

pub mod import;
pub mod merge;
#[allow(clippy::module_inception)]
pub mod store;

pub use import::{export_json, extract_records, parse_document, strict_normalize};
pub use merge::{merge_entries, MergeOutcome};
pub use store::{Clock, EntryPatch, EntryStore, LoadReport, NewEntry, SystemClock, ENTRIES_KEY};
