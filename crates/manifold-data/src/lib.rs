#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Persistence layer for the shared download catalog.
//!
//! Every mutation that resolves a race lives here as a single SQL
//! statement: the stored-file attach, the frozen-space freeze, and the
//! retry reset are compare-and-swap row updates; task and subscription
//! creation lean on unique constraints and re-query on conflict. The rest
//! of the system composes these primitives instead of holding locks
//! across queries.

mod config;
mod db;
mod error;
mod files;
mod history;
mod model;
mod subscriptions;
mod tasks;

pub use config::ConfigStore;
pub use db::Db;
pub use error::{DataError, Result};
pub use files::{FileStore, ReferenceDeletion, StoredArtifact};
pub use history::HistoryStore;
pub use model::{
    StoredFileRow, SubscriptionListing, SubscriptionRow, SubscriptionStatus, TaskHistoryRow,
    TaskRow, TaskSnapshotUpdate, TaskStatus, UserFileRow,
};
pub use subscriptions::SubscriptionStore;
pub use tasks::TaskStore;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Db;

    /// Fresh in-memory database with migrations applied.
    pub(crate) async fn memory_db() -> Db {
        Db::connect("sqlite::memory:")
            .await
            .expect("in-memory database should initialise")
    }
}
