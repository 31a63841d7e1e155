//! md-sections: section-aware editing of long markdown documents.
//!
//! A document is stored as ordered blocks with stable identities, so
//! sections keep their metadata while their text is edited, zoomed into,
//! reordered or re-parsed. This crate coordinates the pieces:
//!
//! - **Block store** - crash-safe persistence and identity-preserving re-parse
//!   (`md-sections-storage`)
//! - **Editor adapters** - tree and marker surfaces producing change-sets
//!   (`md-sections-sync`)
//! - **Coordinator** - sync polling, the content state machine, zoom windows
//!   and the outline projection (this crate)
//!
//! # Quick Start
//!
//! ```rust
//! use md_sections::{BlockStore, Coordinator, CoordinatorConfig, TreeAdapter};
//!
//! # tokio_test_block(async {
//! let mut store = BlockStore::in_memory("Novel");
//! store.replace_all("# Chapter One\n\nIt begins.", None).unwrap();
//!
//! let coordinator = Coordinator::new(store, Box::new(TreeAdapter::new()), CoordinatorConfig::default());
//! coordinator.bootstrap().await.unwrap();
//! assert_eq!(coordinator.surface_content(), "# Chapter One\n\nIt begins.");
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod ack;
pub mod config;
pub mod coordinator;
pub mod outline;
pub mod state;
pub mod sync;
pub mod zoom;

pub use ack::{AckOutcome, AckSlot};
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{Coordinator, CoordinatorError};
pub use outline::{OutlineEntry, OutlineProjection, outline_entries};
pub use state::{ContentState, ContentStateMachine, StateError, Transition};
pub use sync::{PollOutcome, Suppression};
pub use zoom::ZoomWindow;

// Re-export the member crates' main types
pub use md_sections_core::{
    AppliedChangeSet, Block, BlockId, BlockType, ChangeSet, IdConfirmations, LevelFix,
    OrderWindow, ProjectId, SectionMeta, SectionStatus, SortOrder, TempId, ZoomMode,
};
pub use md_sections_doc::{DocumentView, Parser};
pub use md_sections_storage::{
    BlockStore, IdentitySource, IntegrityReport, RepairReport, ReplaceOutcome, StoreError,
};
pub use md_sections_sync::{
    AdapterError, EditorAdapter, LoadStatus, MarkerAdapter, Surface, TreeAdapter,
    ValidationError, ValidationLimits,
};
