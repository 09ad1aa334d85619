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

//! Real-time fan-out of task updates to connected client sessions.
//!
//! Each user owns a set of live outbound channels (one per connected
//! session). Task updates pass through a per-task throttle so bursts of
//! progress ticks collapse to one message every half second, while terminal
//! transitions always go out immediately. A channel whose receiver has gone
//! away is evicted after the fan-out that discovered it completes.

mod hub;
mod payloads;

pub use hub::{HEARTBEAT_INTERVAL, PeerHub, PeerId, TASK_UPDATE_THROTTLE, heartbeat_loop};
pub use payloads::{NotificationLevel, OutboundMessage, TaskUpdate};
