//! Tessera Server: request/response surface over the Tessera engine
//!
//! - [`api`]: serde wire types, one variant per operation
//! - [`service`]: pure data-in/data-out mapping onto [`tessera_core::Engine`]
//! - [`server`]: JSON-lines TCP listener, one worker thread per connection

pub mod api;
pub mod config;
pub mod server;
pub mod service;

pub use api::{ErrorBody, Reply, ReplyEnvelope, Request, RequestEnvelope, Response, WireEntry};
pub use config::ServerConfig;
pub use server::{Server, ShutdownHandle, DEFAULT_MAX_FRAME_BYTES};
pub use service::KvService;

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
