// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One accepted stream, end to end: demultiplexing inbound requests into
//! per-intent workers, funneling all responses through a single writer, and
//! rolling back unfinished intents on close.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use intentlog_protocol::frame::{FrameError, read_request, write_response};
use intentlog_protocol::{Action, Request, Response};

use crate::handler::IntentHandler;
use crate::intent::{IntentWorker, roll_back};

/// Capacity of the outbound response funnel. Every worker's responses pass
/// through this one bounded channel into the single writer task, so frames
/// are never interleaved on the wire.
const RESPONSE_CHANNEL_CAPACITY: usize = 1;

/// One accepted connection.
///
/// Owns the stream's read loop, the per-intent worker registry, and the
/// single outbound writer. When the connection ends - peer close, protocol or
/// transport error, or [`Connection::stop`] - every intent whose last
/// completed action did not release tracking is rolled back through the
/// handler's `reset` before the event loop exits.
pub struct Connection {
    cancel: CancellationToken,
    event_loop: JoinHandle<()>,
}

impl Connection {
    /// Spawn the event loop for an accepted stream.
    ///
    /// `on_close` runs once the connection has fully closed, after recovery;
    /// the server uses it to drop its registry entry. `shutdown` is the
    /// externally supplied cancellation signal; the connection derives its
    /// own child token from it, so either side can end the connection.
    pub fn spawn<S, F>(
        stream: S,
        handler: Arc<dyn IntentHandler>,
        on_close: F,
        shutdown: &CancellationToken,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let cancel = shutdown.child_token();
        let event_loop = tokio::spawn(event_loop(stream, handler, on_close, cancel.clone()));
        Self { cancel, event_loop }
    }

    /// Request the connection to close. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the event loop to finish, including recovery work.
    pub async fn join(self) {
        if let Err(error) = self.event_loop.await {
            error!(%error, "connection event loop failed");
        }
    }

    /// Stop the connection and wait for it to fully close.
    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }
}

async fn event_loop<S, F>(
    stream: S,
    handler: Arc<dyn IntentHandler>,
    on_close: F,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (response_tx, response_rx) = mpsc::channel::<Response>(RESPONSE_CHANNEL_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, response_rx, cancel.clone()));

    // Workers get their own child token so recovery can stop them while the
    // connection token stays untriggered on a clean peer close.
    let workers_cancel = cancel.child_token();
    let mut intents: HashMap<Uuid, IntentWorker> = HashMap::new();

    debug!("connection opened");

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("connection close requested");
                break;
            }
            request = read_request(&mut reader) => match request {
                Ok(request) => request,
                Err(FrameError::ConnectionClosed) => {
                    debug!("peer closed the connection");
                    break;
                }
                Err(FrameError::Io(error)) if is_disconnect(&error) => {
                    debug!(%error, "peer dropped the connection");
                    break;
                }
                Err(error) => {
                    error!(%error, "protocol error, closing connection");
                    break;
                }
            },
        };

        trace!(intent_id = %request.intent_id, action = ?request.action, "received request");

        match request.action {
            Action::Ping => {
                let pong = Response::pong(request.intent_id, request.payload);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = response_tx.send(pong) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Action::Pong => {}
            _ => {
                route(
                    &mut intents,
                    request,
                    &handler,
                    &response_tx,
                    &workers_cancel,
                );
                // Reap intents whose life ended; a later action on the same
                // id gets a fresh worker.
                intents.retain(|_, worker| !worker.is_settled());
            }
        }
    }

    // Recovery: stop the workers, drain any in-flight handler call, and roll
    // back every intent left in a non-released state. The connection token is
    // handed to the reset calls; it is only triggered when teardown came from
    // stop() or a fatal error, not on a clean peer close.
    workers_cancel.cancel();
    for (intent_id, worker) in intents.drain() {
        if !worker.stop().await {
            roll_back(handler.as_ref(), intent_id, cancel.clone()).await;
        }
    }

    drop(response_tx);
    if let Err(error) = writer_task.await {
        error!(%error, "connection writer task failed");
    }

    on_close();
    debug!("connection closed");
}

/// Route a request to its intent's worker, creating the worker on first
/// sight. The registry is touched only by the event loop, so no lock is
/// needed; only the worker's own queue is shared with its task.
fn route(
    intents: &mut HashMap<Uuid, IntentWorker>,
    request: Request,
    handler: &Arc<dyn IntentHandler>,
    responses: &mpsc::Sender<Response>,
    workers_cancel: &CancellationToken,
) {
    let intent_id = request.intent_id;
    let spawn = || {
        IntentWorker::spawn(
            intent_id,
            handler.clone(),
            responses.clone(),
            workers_cancel.clone(),
        )
    };

    match intents.entry(intent_id) {
        Entry::Vacant(entry) => {
            if entry.insert(spawn()).enqueue(request).is_err() {
                warn!(%intent_id, "dropped request for an already-cancelled worker");
            }
        }
        Entry::Occupied(mut entry) => {
            if entry.get().is_settled() {
                // Previous life of this id is done; start a fresh one. The
                // settled worker is idle, so ordering cannot be violated.
                entry.insert(spawn());
            }
            if let Err(request) = entry.get().enqueue(request) {
                warn!(%intent_id, "intent worker died unexpectedly, respawning");
                entry.insert(spawn());
                if entry.get().enqueue(request).is_err() {
                    warn!(%intent_id, "dropped request for an already-cancelled worker");
                }
            }
        }
    }
}

/// The only code path that writes to the stream. Responses arrive through
/// the bounded funnel and are written whole, one at a time.
async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut responses: mpsc::Receiver<Response>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            response = responses.recv() => match response {
                Some(response) => response,
                None => break,
            },
        };

        trace!(
            intent_id = %response.intent_id,
            outcome = ?response.outcome,
            "sending response"
        );

        if let Err(error) = write_response(&mut writer, &response).await {
            warn!(%error, "failed to write response, closing connection");
            cancel.cancel();
            break;
        }
    }
}

/// Socket errors that mean the peer went away rather than a local failure.
pub(crate) fn is_disconnect(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
    )
}
