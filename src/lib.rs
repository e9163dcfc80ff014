// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod missions;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod runlock;
pub mod scheduler;
pub mod storage;

pub use crate::api::router;
pub use crate::pipeline::{Job, JobOutcome, Pipeline};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` filter (default: info for our targets, warn elsewhere), JSON lines when
/// `LOG_FORMAT=json`. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_missions=info,ingest=info,aggregate=info,missions=info,dispatch=info,pipeline=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialized: {e}");
    }
}
