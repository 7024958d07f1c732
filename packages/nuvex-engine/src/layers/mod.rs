//! The three storage tiers and the glob matching they share.

mod cache;
#[cfg(test)]
pub(crate) mod fakes;
mod glob;
mod memory;
mod schema;
mod store;
mod traits;

pub use cache::CacheLayer;
#[cfg(test)]
pub(crate) use fakes::FakeLayer;
pub use glob::{glob_to_regex, glob_to_sql_like};
pub use memory::MemoryLayer;
pub use schema::SchemaManager;
pub use store::StoreLayer;
pub use traits::{EntryMeta, Layer, StoredEntry};
