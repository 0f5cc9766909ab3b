//! screenchunk - chunked multi-track capture writer.
//!
//! Takes timestamped video and audio frames from an external capture
//! source, writes them into aligned containers, and hands finished chunks
//! to a consumer process through shared storage.

pub mod capture;
pub mod config;
pub mod handoff;
pub mod recorder;
pub mod utils;
pub mod writer;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// Honours `RUST_LOG`; safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screenchunk=debug,screenchunk_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
