// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-intent worker: one task applying one intent's requests in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};
use uuid::Uuid;

use intentlog_protocol::{Action, Request, Response};

use crate::handler::{HandlerError, IntentHandler};

/// One logical unit of ordered processing, bound to a single intent id.
///
/// Requests are enqueued without blocking; a dedicated task dequeues them one
/// at a time, applies each to the handler, and funnels the outcome into the
/// connection's response channel before dequeuing the next. The worker flags
/// itself settled once it has completed a tracking-releasing action with an
/// empty queue; the owning connection reaps it from there.
pub(crate) struct IntentWorker {
    requests: mpsc::UnboundedSender<Request>,
    task: JoinHandle<()>,
    settled: Arc<AtomicBool>,
}

impl IntentWorker {
    /// Spawn the worker for one intent id.
    ///
    /// `responses` is the connection's bounded outbound funnel; `cancel` is
    /// the connection's worker token, cancelled at teardown.
    pub(crate) fn spawn(
        intent_id: Uuid,
        handler: Arc<dyn IntentHandler>,
        responses: mpsc::Sender<Response>,
        cancel: CancellationToken,
    ) -> Self {
        let (requests, queue) = mpsc::unbounded_channel();
        let settled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(
            intent_id,
            handler,
            queue,
            responses,
            cancel,
            settled.clone(),
        ));
        Self {
            requests,
            task,
            settled,
        }
    }

    /// Append a request to the worker's queue. Never blocks.
    ///
    /// Fails by returning the request if the worker's task is gone (settled
    /// and reaped concurrently, or killed by a handler panic); the caller
    /// starts a fresh worker for the id.
    pub(crate) fn enqueue(&self, request: Request) -> Result<(), Request> {
        self.requests.send(request).map_err(|failed| failed.0)
    }

    /// Whether the last completed action released recovery tracking.
    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Await the worker's task and report whether the intent settled.
    ///
    /// Call after the worker token has been cancelled; an in-flight handler
    /// call is drained, queued requests are discarded.
    pub(crate) async fn stop(self) -> bool {
        drop(self.requests);
        if let Err(error) = self.task.await {
            error!(%error, "intent worker task failed");
        }
        self.settled.load(Ordering::Acquire)
    }
}

async fn run(
    intent_id: Uuid,
    handler: Arc<dyn IntentHandler>,
    mut queue: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::Sender<Response>,
    cancel: CancellationToken,
    settled: Arc<AtomicBool>,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // A new action revives the intent: it is no longer settled until
        // this action completes and proves to be a releasing one.
        settled.store(false, Ordering::Release);

        let action = request.action;
        trace!(%intent_id, ?action, "applying action");

        // The handler call is awaited in full even during teardown; the
        // token lets the handler wind down cooperatively.
        let result = dispatch(handler.as_ref(), request, cancel.clone()).await;

        let response = match result {
            Ok(()) => Response::success(intent_id),
            Err(error) => {
                debug!(%intent_id, ?action, %error, "action failed");
                Response::error(intent_id, error.into_payload())
            }
        };

        if action.ends_tracking() && queue.is_empty() {
            settled.store(true, Ordering::Release);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = responses.send(response) => {
                if sent.is_err() {
                    // Writer is gone; the connection is tearing down.
                    break;
                }
            }
        }
    }
}

async fn dispatch(
    handler: &dyn IntentHandler,
    request: Request,
    cancel: CancellationToken,
) -> Result<(), HandlerError> {
    let Request {
        intent_id,
        action,
        payload,
    } = request;
    match action {
        Action::Open => handler.open(intent_id, payload, cancel).await,
        Action::Amend => handler.amend(intent_id, payload, cancel).await,
        Action::Close => handler.close(intent_id, payload, cancel).await,
        Action::Abort => handler.abort(intent_id, payload, cancel).await,
        Action::Timeout => handler.timeout(intent_id, payload, cancel).await,
        Action::Reset => handler.reset(intent_id, payload, cancel).await,
        // Keepalive frames are answered by the connection and never queued.
        Action::Ping | Action::Pong => Ok(()),
    }
}

/// Roll back an unfinished intent during connection teardown.
pub(crate) async fn roll_back(
    handler: &dyn IntentHandler,
    intent_id: Uuid,
    cancel: CancellationToken,
) {
    debug!(%intent_id, "rolling back unfinished intent");
    if let Err(error) = handler.reset(intent_id, Bytes::new(), cancel).await {
        // Recovery of one intent must not block recovery of the others.
        error!(%intent_id, %error, "rollback failed during connection teardown");
    }
}
