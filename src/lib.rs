#![doc(test(attr(deny(warnings))))]

//! Pocketbook Core offers the entry lifecycle, monthly-recurrence expansion,
//! aggregation, and merge primitives that power personal budgeting clients.

pub mod aggregate;
pub mod config;
pub mod entry;
pub mod errors;
pub mod storage;
pub mod store;
pub mod utils;

/// Initializes global tracing. Safe to call more than once.
pub fn init() {
    utils::init_tracing();
}
