// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests over real TCP: server, client, and graceful shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use intentlog_core::client::{Client, ClientError};
use intentlog_core::server::{Server, ServerConfig};
use intentlog_protocol::Action;

use common::RecordingHandler;

fn local_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    }
}

fn start_server(handler: Arc<RecordingHandler>) -> (Server, CancellationToken) {
    let shutdown = CancellationToken::new();
    let server = Server::bind(handler, local_config(), &shutdown).expect("failed to bind server");
    (server, shutdown)
}

#[tokio::test]
async fn full_intent_lifecycle_over_tcp() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler.clone());

    let client = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");

    let intent = client.open(&b"open"[..]).await.expect("open failed");
    let id = intent.id();
    intent.amend(&b"amend"[..]).await.expect("amend failed");
    intent.close(&b"close"[..]).await.expect("close failed");

    client.shutdown().await;
    server.shutdown().await;

    let calls = handler.calls();
    assert_eq!(calls[0], (Action::Open, id, b"open".to_vec()));
    assert_eq!(calls[1], (Action::Amend, id, b"amend".to_vec()));
    assert_eq!(calls[2], (Action::Close, id, b"close".to_vec()));
    assert_eq!(calls.len(), 3);
}

#[tokio::test]
async fn server_shutdown_rolls_back_open_intents() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler.clone());

    let client = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");

    let intent = client.open(&b"open"[..]).await.expect("open failed");
    let id = intent.id();

    // Shut the server down while the intent is still open.
    server.shutdown().await;

    let calls = handler.wait_for_calls(2).await;
    assert_eq!(calls[0].0, Action::Open);
    assert_eq!(calls[1], (Action::Reset, id, Vec::new()));

    drop(intent);
    client.shutdown().await;
}

#[tokio::test]
async fn handler_error_surfaces_as_server_error() {
    let handler = RecordingHandler::new();
    handler.fail_on(Action::Amend);
    let (server, shutdown) = start_server(handler.clone());

    let client = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");

    let intent = client.open(&b"open"[..]).await.expect("open failed");
    match intent.amend(&b"amend"[..]).await {
        Err(ClientError::Server { payload }) => assert_eq!(&payload[..], b"error payload"),
        other => panic!("expected server error, got {other:?}"),
    }

    // The connection survives the handler error.
    intent.close(&b"close"[..]).await.expect("close failed");

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn dropping_an_open_intent_handle_resets_it() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler.clone());

    let client = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");

    let intent = client.open(&b"open"[..]).await.expect("open failed");
    let id = intent.id();
    drop(intent);

    let calls = handler.wait_for_calls(2).await;
    assert_eq!(calls[1], (Action::Reset, id, Vec::new()));

    client.shutdown().await;
    server.shutdown().await;

    // The explicit reset settled the intent; teardown added nothing.
    assert_eq!(handler.calls().len(), 2);
}

#[tokio::test]
async fn pipelined_calls_on_one_intent_resolve_in_order() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler.clone());

    let client = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");

    let intent = client.open(&b"open"[..]).await.expect("open failed");
    let (first, second) = tokio::join!(intent.amend(&b"one"[..]), intent.amend(&b"two"[..]));
    first.expect("first amend failed");
    second.expect("second amend failed");

    intent.close(&b""[..]).await.expect("close failed");

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn two_clients_are_isolated() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler.clone());

    let first = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");
    let second = Client::connect(server.local_addr(), &shutdown)
        .await
        .expect("failed to connect");

    let left = first.open(&b"left"[..]).await.expect("open failed");
    let right = second.open(&b"right"[..]).await.expect("open failed");

    // Killing one client only rolls back its own intent.
    let left_id = left.id();
    drop(left);
    first.shutdown().await;

    let calls = handler.wait_for_calls(3).await;
    let resets: Vec<_> = calls
        .iter()
        .filter(|(action, _, _)| *action == Action::Reset)
        .collect();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].1, left_id);

    right.close(&b""[..]).await.expect("close failed");
    second.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn calls_fail_fast_once_the_server_is_gone() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler.clone());
    let addr = server.local_addr();

    let client = Client::connect(addr, &shutdown)
        .await
        .expect("failed to connect");
    let intent = client.open(&b"open"[..]).await.expect("open failed");

    server.shutdown().await;

    // The client notices the closed stream; further calls fail rather than
    // hanging.
    let result = tokio::time::timeout(Duration::from_secs(5), intent.amend(&b"late"[..]))
        .await
        .expect("call hung after server shutdown");
    assert!(result.is_err());

    drop(intent);
    client.shutdown().await;
}

#[tokio::test]
async fn server_stop_is_idempotent() {
    let handler = RecordingHandler::new();
    let (server, _shutdown) = start_server(handler);

    server.stop();
    server.stop();
    server.shutdown().await;
}

#[tokio::test]
async fn external_token_shuts_the_server_down() {
    let handler = RecordingHandler::new();
    let (server, shutdown) = start_server(handler);

    shutdown.cancel();
    // The accept loop observes the parent token; shutdown just joins it.
    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown hung after external cancellation");
}
