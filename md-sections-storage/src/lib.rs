//! Persistence for md-sections projects.
//!
//! [`Storage`] keeps crash-safe snapshots on disk. [`BlockStore`] owns the
//! block table on top of it: identity, ordering, section metadata and the
//! transactional write operations every other component goes through.

mod integrity;
mod record;
mod storage;
mod store;
mod table;

pub use integrity::{IdentitySource, IntegrityReport, RepairReport};
pub use storage::{Storage, StorageError};
pub use store::{BlockStore, ReplaceOutcome, StoreError};
pub use table::BlockTable;
