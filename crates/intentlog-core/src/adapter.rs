// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed payload boundary.
//!
//! The transport only moves opaque bytes; this module is the one place a
//! payload encoding is chosen (JSON via serde). [`Typed`] wraps a
//! [`TypedIntentHandler`] into the transport's [`IntentHandler`], decoding
//! request payloads and encoding recognized application errors into Error
//! response payloads. [`TypedClient`] is the mirror image for callers.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{Client, ClientError, Intent};
use crate::handler::{HandlerError, IntentHandler};

/// An action handler working with typed payloads.
///
/// Payloads decode from JSON; an empty wire payload (always the case for the
/// transport's own teardown resets) arrives as `None`. A returned
/// `Self::Error` is encoded into the Error response payload, so a typed
/// client on the other side can decode it back.
#[async_trait]
pub trait TypedIntentHandler: Send + Sync + 'static {
    /// Decoded request payload type
    type Payload: DeserializeOwned + Send;
    /// Application-level error type, serialized into Error responses
    type Error: Serialize + fmt::Display + Send;

    /// Start the intent's life.
    async fn open(
        &self,
        intent_id: Uuid,
        payload: Option<Self::Payload>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;

    /// Add to an open intent.
    async fn amend(
        &self,
        intent_id: Uuid,
        payload: Option<Self::Payload>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;

    /// Finish the intent successfully.
    async fn close(
        &self,
        intent_id: Uuid,
        payload: Option<Self::Payload>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;

    /// Finish the intent as failed.
    async fn abort(
        &self,
        intent_id: Uuid,
        payload: Option<Self::Payload>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;

    /// Finish the intent as expired.
    async fn timeout(
        &self,
        intent_id: Uuid,
        payload: Option<Self::Payload>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;

    /// Roll the intent back.
    async fn reset(
        &self,
        intent_id: Uuid,
        payload: Option<Self::Payload>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;
}

/// Adapter making a [`TypedIntentHandler`] pluggable into the transport.
pub struct Typed<H> {
    inner: H,
}

impl<H> Typed<H> {
    /// Wrap a typed handler.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    /// Access the wrapped handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

fn decode_payload<T: DeserializeOwned>(payload: &Bytes) -> Result<Option<T>, HandlerError> {
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(payload)
        .map(Some)
        .map_err(|error| HandlerError::Internal(anyhow::anyhow!("malformed payload: {error}")))
}

fn encode_error<E: Serialize + fmt::Display>(error: E) -> HandlerError {
    match serde_json::to_vec(&error) {
        Ok(payload) => HandlerError::application(error.to_string(), payload),
        Err(encode_error) => HandlerError::Internal(anyhow::anyhow!(
            "failed to encode error '{error}': {encode_error}"
        )),
    }
}

#[async_trait]
impl<H: TypedIntentHandler> IntentHandler for Typed<H> {
    async fn open(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let payload = decode_payload::<H::Payload>(&payload)?;
        self.inner
            .open(intent_id, payload, cancel)
            .await
            .map_err(encode_error)
    }

    async fn amend(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let payload = decode_payload::<H::Payload>(&payload)?;
        self.inner
            .amend(intent_id, payload, cancel)
            .await
            .map_err(encode_error)
    }

    async fn close(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let payload = decode_payload::<H::Payload>(&payload)?;
        self.inner
            .close(intent_id, payload, cancel)
            .await
            .map_err(encode_error)
    }

    async fn abort(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let payload = decode_payload::<H::Payload>(&payload)?;
        self.inner
            .abort(intent_id, payload, cancel)
            .await
            .map_err(encode_error)
    }

    async fn timeout(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let payload = decode_payload::<H::Payload>(&payload)?;
        self.inner
            .timeout(intent_id, payload, cancel)
            .await
            .map_err(encode_error)
    }

    async fn reset(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let payload = decode_payload::<H::Payload>(&payload)?;
        self.inner
            .reset(intent_id, payload, cancel)
            .await
            .map_err(encode_error)
    }
}

/// Error returned by typed client calls.
#[derive(Debug, thiserror::Error)]
pub enum TypedCallError<E: fmt::Display + fmt::Debug> {
    /// The handler on the server reported an application error.
    #[error("remote error: {0}")]
    Remote(E),

    /// Encoding the request payload failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The call failed below the application level.
    #[error(transparent)]
    Transport(#[from] ClientError),
}

/// Client wrapper speaking typed payloads.
pub struct TypedClient<P, E> {
    inner: Client,
    _types: PhantomData<fn() -> (P, E)>,
}

impl<P, E> TypedClient<P, E>
where
    P: Serialize,
    E: DeserializeOwned + fmt::Display + fmt::Debug,
{
    /// Wrap an established client.
    pub fn new(inner: Client) -> Self {
        Self {
            inner,
            _types: PhantomData,
        }
    }

    /// Open a new intent with a typed payload.
    pub async fn open(&self, payload: &P) -> Result<TypedIntent<P, E>, TypedCallError<E>> {
        let encoded = serde_json::to_vec(payload)?;
        let intent = self
            .inner
            .open(encoded)
            .await
            .map_err(map_client_error::<E>)?;
        Ok(TypedIntent {
            inner: intent,
            _types: PhantomData,
        })
    }

    /// Stop the client and wait for it to fully close.
    pub async fn shutdown(self) {
        self.inner.shutdown().await;
    }
}

/// Typed handle to one open intent.
pub struct TypedIntent<P, E> {
    inner: Intent,
    _types: PhantomData<fn() -> (P, E)>,
}

impl<P, E> TypedIntent<P, E>
where
    P: Serialize,
    E: DeserializeOwned + fmt::Display + fmt::Debug,
{
    /// The intent's correlation id.
    pub fn id(&self) -> Uuid {
        self.inner.id()
    }

    /// Add to the intent.
    pub async fn amend(&self, payload: &P) -> Result<(), TypedCallError<E>> {
        let encoded = serde_json::to_vec(payload)?;
        self.inner
            .amend(encoded)
            .await
            .map_err(map_client_error::<E>)
    }

    /// Finish the intent successfully.
    pub async fn close(self, payload: &P) -> Result<(), TypedCallError<E>> {
        let encoded = serde_json::to_vec(payload)?;
        self.inner
            .close(encoded)
            .await
            .map_err(map_client_error::<E>)
    }

    /// Finish the intent as failed.
    pub async fn abort(self, payload: &P) -> Result<(), TypedCallError<E>> {
        let encoded = serde_json::to_vec(payload)?;
        self.inner
            .abort(encoded)
            .await
            .map_err(map_client_error::<E>)
    }

    /// Finish the intent as expired.
    pub async fn timeout(self, payload: &P) -> Result<(), TypedCallError<E>> {
        let encoded = serde_json::to_vec(payload)?;
        self.inner
            .timeout(encoded)
            .await
            .map_err(map_client_error::<E>)
    }

    /// Roll the intent back.
    pub async fn reset(self, payload: &P) -> Result<(), TypedCallError<E>> {
        let encoded = serde_json::to_vec(payload)?;
        self.inner
            .reset(encoded)
            .await
            .map_err(map_client_error::<E>)
    }
}

fn map_client_error<E: DeserializeOwned + fmt::Display + fmt::Debug>(
    error: ClientError,
) -> TypedCallError<E> {
    match error {
        ClientError::Server { payload } => match serde_json::from_slice::<E>(&payload) {
            Ok(remote) => TypedCallError::Remote(remote),
            // Not an application error (e.g. an internal handler failure);
            // surface it as the raw transport error.
            Err(_) => TypedCallError::Transport(ClientError::Server { payload }),
        },
        other => TypedCallError::Transport(other),
    }
}
