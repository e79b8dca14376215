// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Intent Log Core - protocol engine for the intent log transport
//!
//! This crate implements the server side of the intent log protocol - the
//! transport that tracks multi-step lifecycle operations ("intents") over
//! persistent TCP connections - plus the matching client. It carries no
//! business semantics: every action is delegated to a pluggable
//! [`IntentHandler`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Server                                 │
//! │        accept loop · connection registry · graceful shutdown        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ one per accepted socket
//!                ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Connection                               │
//! │  read loop ──► intent registry ──► per-intent workers ──► handler   │
//! │                                         │                           │
//! │  single writer ◄── bounded funnel ◄─────┘                           │
//! │  teardown: drain workers, reset every unfinished intent             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! | Guarantee | Mechanism |
//! |-----------|-----------|
//! | Per-intent ordering | one worker task per id, response funneled before next dequeue |
//! | Cross-intent concurrency | independent worker tasks |
//! | Whole frames on the wire | all responses pass through one writer task |
//! | No abandoned intents | teardown resets every id not finished or reset |
//!
//! # Actions
//!
//! | Action | Final | Description |
//! |--------|-------|-------------|
//! | `Open` | no | start an intent's life on the connection |
//! | `Amend` | no | add to an open intent |
//! | `Close` | yes | finish successfully |
//! | `Abort` | yes | finish as failed |
//! | `Timeout` | yes | finish as expired |
//! | `Reset` | no | roll back; the id may be reused |
//!
//! A connection that dies while an intent has neither finished nor been reset
//! invokes the handler's `reset` for that id during teardown, exactly once.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `INTENTLOG_BIND_ADDR` | `0.0.0.0` | Bind address |
//! | `INTENTLOG_PORT` | `1337` | Listening port |
//! | `INTENTLOG_BACKLOG` | `100` | Listen backlog |
//!
//! # Modules
//!
//! - [`handler`]: the pluggable action handler contract
//! - [`server`] / [`connection`]: the engine, with one worker task per
//!   live intent underneath
//! - [`client`]: the client half of the protocol
//! - [`adapter`]: typed payload (de)serialization boundary

#![deny(missing_docs)]

/// Typed payload adapter: the only place a payload encoding is chosen.
pub mod adapter;

/// Client half of the protocol: request pipelining and response correlation.
pub mod client;

/// Per-socket event loop: demultiplexing, single-writer funnel, recovery.
pub mod connection;

/// The pluggable action handler contract.
pub mod handler;

/// Per-intent workers applying one intent's actions in order.
mod intent;

/// TCP server: accept loop, connection registry, graceful shutdown.
pub mod server;

pub use adapter::{Typed, TypedClient, TypedIntentHandler};
pub use client::{Client, ClientError, Intent};
pub use connection::Connection;
pub use handler::{HandlerError, IntentHandler};
pub use server::{Server, ServerConfig, ServerError};
