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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Content-addressed artifact store.
//!
//! Completed payloads are promoted out of the daemon's task-private
//! download directory into `store/<hh>/<hash>/`, where `<hh>` is the first
//! two hex characters of the content hash so no single directory grows
//! unbounded. Rows in the catalog carry reference counts; the artifact
//! lives exactly as long as its longest-holding user reference.

mod error;
mod layout;
mod service;

pub use error::{StoreError, StoreResult};
pub use layout::StoreLayout;
pub use service::ContentStore;
