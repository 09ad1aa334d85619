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
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint that wires the orchestrator services together and
//! runs the reconciliation loops until shutdown.

mod bootstrap;
mod error;
mod telemetry;

/// Bootstraps the orchestrator and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    bootstrap::run_app().await
}
