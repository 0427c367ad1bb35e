//! Entry domain models, normalization, and monthly-recurrence expansion.

#[allow(clippy::module_inception)]
pub mod entry;
pub mod normalize;
pub mod recurrence;

pub use entry::{Entry, EntryKind, Frequency, Recurrence, Termination};
pub use normalize::{normalize, normalize_recurrence, parse_instant, Normalized};
pub use recurrence::{expand_to, remove_with_scope, shift_months, RemovalScope};
