// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Intent Log Core - standalone server daemon
//!
//! Runs the intent log server with a handler that logs every action. Useful
//! as a smoke-test peer and as the template for embedding the engine.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use intentlog_core::handler::{HandlerError, IntentHandler};
use intentlog_core::server::{Server, ServerConfig};

/// Logs every action it is asked to apply.
struct LogHandler;

#[async_trait]
impl IntentHandler for LogHandler {
    async fn open(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        info!(%intent_id, payload_len = payload.len(), "opening intent");
        Ok(())
    }

    async fn amend(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        info!(%intent_id, payload_len = payload.len(), "amending intent");
        Ok(())
    }

    async fn close(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        info!(%intent_id, payload_len = payload.len(), "closing intent");
        Ok(())
    }

    async fn abort(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        info!(%intent_id, payload_len = payload.len(), "aborting intent");
        Ok(())
    }

    async fn timeout(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        info!(%intent_id, payload_len = payload.len(), "timing out intent");
        Ok(())
    }

    async fn reset(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        info!(%intent_id, payload_len = payload.len(), "resetting intent");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("intentlog_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Intent Log Core");

    let config = ServerConfig::from_env();
    info!(
        bind_addr = %config.bind_addr,
        backlog = config.backlog,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let server = Server::bind(Arc::new(LogHandler), config, &shutdown)?;

    info!(addr = %server.local_addr(), "Intent Log Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
