pub mod json_backend;
pub mod memory;

use crate::errors::Result;

/// Abstraction over the key-value persistence collaborator. Values are JSON
/// documents; callers own serialization so the trait stays object-safe.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub use json_backend::FileStore;
pub use memory::MemoryStore;
