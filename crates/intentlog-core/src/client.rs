// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client half of the intent log protocol.
//!
//! Requests are pipelined through a bounded channel onto the stream; the
//! reader correlates responses back to callers through a per-intent FIFO, so
//! several calls on one intent may be in flight while responses for it come
//! back in request order.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};
use uuid::Uuid;

use intentlog_protocol::frame::{FrameError, read_response, write_request};
use intentlog_protocol::{Action, Outcome, Request, Response};

use crate::connection::is_disconnect;

/// Capacity of the outbound request channel; requests are written one at a
/// time by the single writer task.
const REQUEST_CHANNEL_CAPACITY: usize = 1;

/// Errors that can occur in the client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting the TCP socket failed.
    #[error("connect error: {0}")]
    Connect(#[from] std::io::Error),

    /// Reading or writing a frame failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The client is closed; the call was not (or may not have been) applied.
    #[error("client closed")]
    Closed,

    /// The server reported an Error outcome for the call.
    #[error("server error: {}", String::from_utf8_lossy(.payload))]
    Server {
        /// Encoded error payload from the Error response
        payload: Bytes,
    },
}

type Reply = oneshot::Sender<Result<Response, ClientError>>;
type Dispatch = (Request, Option<Reply>);
type PendingMap = Arc<Mutex<HashMap<Uuid, VecDeque<Reply>>>>;

/// A client connection to an intent log server.
///
/// Cheap to share behind a reference; calls from many tasks are serialized
/// onto the stream by the writer task. Dropping the client without
/// [`Client::shutdown`] leaves teardown to the background tasks.
pub struct Client {
    requests: mpsc::Sender<Dispatch>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Client {
    /// Connect to a server over TCP.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        shutdown: &CancellationToken,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream, shutdown))
    }

    /// Run the client over an already-established stream.
    pub fn new<S>(stream: S, shutdown: &CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (requests, queue) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::default();
        let cancel = shutdown.child_token();

        let reader = tokio::spawn(read_loop(
            reader,
            pending.clone(),
            requests.clone(),
            cancel.clone(),
        ));
        let writer = tokio::spawn(write_loop(writer, queue, pending, cancel.clone()));

        Self {
            requests,
            cancel,
            reader,
            writer,
        }
    }

    /// Open a new intent with a fresh id and return its handle.
    pub async fn open(&self, payload: impl Into<Bytes>) -> Result<Intent, ClientError> {
        let id = Uuid::new_v4();
        call(&self.requests, Request::new(id, Action::Open, payload)).await?;
        Ok(Intent {
            requests: self.requests.clone(),
            id,
            open: true,
        })
    }

    /// Request the client to close. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the client and wait for its tasks to finish. Pending calls fail
    /// with [`ClientError::Closed`].
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.reader.await {
            error!(%error, "client reader task failed");
        }
        if let Err(error) = self.writer.await {
            error!(%error, "client writer task failed");
        }
    }
}

/// Handle to one open intent on a client.
///
/// `close`, `abort`, `timeout` and `reset` end the intent and consume the
/// handle. Dropping a handle that is still open issues a best-effort
/// background reset; the server also rolls back on disconnect, so the intent
/// can never stay half-applied either way.
pub struct Intent {
    requests: mpsc::Sender<Dispatch>,
    id: Uuid,
    open: bool,
}

impl Intent {
    /// The intent's correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Add to the intent.
    pub async fn amend(&self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        call(&self.requests, Request::new(self.id, Action::Amend, payload)).await?;
        Ok(())
    }

    /// Finish the intent successfully.
    pub async fn close(self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.finish(Action::Close, payload.into()).await
    }

    /// Finish the intent as failed.
    pub async fn abort(self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.finish(Action::Abort, payload.into()).await
    }

    /// Finish the intent as expired.
    pub async fn timeout(self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.finish(Action::Timeout, payload.into()).await
    }

    /// Roll the intent back. The id may be reused afterwards.
    pub async fn reset(self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.finish(Action::Reset, payload.into()).await
    }

    async fn finish(mut self, action: Action, payload: Bytes) -> Result<(), ClientError> {
        call(&self.requests, Request::new(self.id, action, payload)).await?;
        // Only a confirmed finish releases the handle; on error the drop
        // still issues a rollback.
        self.open = false;
        Ok(())
    }
}

impl Drop for Intent {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let requests = self.requests.clone();
        let id = self.id;
        // Best-effort rollback for a handle dropped mid-intent.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let request = Request::new(id, Action::Reset, Bytes::new());
                if let Err(error) = call(&requests, request).await {
                    debug!(intent_id = %id, %error, "failed to reset dropped intent");
                }
            });
        }
    }
}

/// Send one request and wait for its correlated response.
pub(crate) async fn call(
    requests: &mpsc::Sender<Dispatch>,
    request: Request,
) -> Result<Response, ClientError> {
    trace!(intent_id = %request.intent_id, action = ?request.action, "calling intent");

    let (reply_tx, reply_rx) = oneshot::channel();
    requests
        .send((request, Some(reply_tx)))
        .await
        .map_err(|_| ClientError::Closed)?;

    let response = reply_rx.await.map_err(|_| ClientError::Closed)??;
    match response.outcome {
        Outcome::Error => Err(ClientError::Server {
            payload: response.payload,
        }),
        _ => Ok(response),
    }
}

async fn read_loop<S>(
    mut reader: ReadHalf<S>,
    pending: PendingMap,
    requests: mpsc::Sender<Dispatch>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            response = read_response(&mut reader) => match response {
                Ok(response) => response,
                Err(FrameError::ConnectionClosed) => {
                    debug!("server closed the connection");
                    break;
                }
                Err(FrameError::Io(error)) if is_disconnect(&error) => {
                    debug!(%error, "server dropped the connection");
                    break;
                }
                Err(error) => {
                    error!(%error, "client protocol error");
                    break;
                }
            },
        };

        match response.outcome {
            Outcome::Ping => {
                let pong = Request::new(response.intent_id, Action::Pong, response.payload);
                if requests.send((pong, None)).await.is_err() {
                    break;
                }
            }
            Outcome::Pong => {}
            _ => {
                let reply = {
                    let mut pending = lock(&pending);
                    match pending.entry(response.intent_id) {
                        Entry::Occupied(mut entry) => {
                            let reply = entry.get_mut().pop_front();
                            if entry.get().is_empty() {
                                entry.remove();
                            }
                            reply
                        }
                        Entry::Vacant(_) => None,
                    }
                };
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Ok(response));
                    }
                    None => {
                        error!(
                            intent_id = %response.intent_id,
                            "received response for unknown intent"
                        );
                    }
                }
            }
        }
    }

    // The stream is gone; fail every caller still waiting and release the
    // writer.
    cancel.cancel();
    lock(&pending).clear();
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut queue: mpsc::Receiver<Dispatch>,
    pending: PendingMap,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let (request, reply) = tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let intent_id = request.intent_id;

        // Register before writing so a fast response cannot race past its
        // caller.
        if let Some(reply) = reply {
            lock(&pending).entry(intent_id).or_default().push_back(reply);
        }

        if let Err(error) = write_request(&mut writer, &request).await {
            error!(%error, "failed to send request, closing client");
            let reply = lock(&pending)
                .get_mut(&intent_id)
                .and_then(|queue| queue.pop_back());
            if let Some(reply) = reply {
                let _ = reply.send(Err(error.into()));
            }
            cancel.cancel();
            break;
        }
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<Uuid, VecDeque<Reply>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
