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

//! Shared-download orchestration core.
//!
//! One physical daemon transfer fans out to many user subscriptions. The
//! submission path deduplicates by fingerprint and admits against per-user
//! quotas; the reconciler merges the daemon's push events with a periodic
//! poll into idempotent transitions on the task state machine; terminal
//! transitions hand completed artifacts to the content store and settle
//! every pending subscription exactly once.

mod admission;
mod error;
mod listener;
mod orchestrator;
mod poll;
mod reconciler;
mod state;
mod submit;
mod view;

pub use admission::{FlatQuota, MAGNET_MIN_SPACE, QuotaProvider, SpaceInfo};
pub use error::{CoreError, CoreResult};
pub use listener::listen_daemon_events;
pub use orchestrator::Orchestrator;
pub use poll::poll_loop;
pub use submit::{SubmissionSource, SubmitRequest, UserContext};
pub use view::ListFilter;
