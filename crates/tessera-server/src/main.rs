use std::sync::Arc;

use anyhow::Context;
use tessera_core::Engine;
use tessera_server::{KvService, Server, ServerConfig};

fn main() -> anyhow::Result<()> {
    tessera_server::init_tracing();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        default_timeout = ?config.default_timeout,
        max_frame_bytes = config.max_frame_bytes,
        storage = ?config.engine.storage,
        "starting tessera server"
    );

    let engine = Engine::open(config.engine.clone()).context("failed to open engine")?;
    let service = Arc::new(KvService::new(Arc::new(engine), config.default_timeout));
    let server = Server::bind(config.listen_addr.as_str(), service)
        .with_context(|| format!("failed to bind {}", config.listen_addr))?
        .with_max_frame_bytes(config.max_frame_bytes);

    server.run()?;
    Ok(())
}
