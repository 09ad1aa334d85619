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

//! Configuration for the orchestrator.
//!
//! Environment variables provide the static baseline; the `config` table
//! in the catalog overlays the operator-tunable subset at read time so the
//! daemon endpoint and size caps can change without a restart.

mod error;
mod model;
mod service;

pub use error::{ConfigError, ConfigResult};
pub use model::Settings;
pub use service::ConfigService;
