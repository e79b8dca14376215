// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The pluggable action handler invoked by the transport.
//!
//! The transport only ever sees opaque payload bytes; all application
//! semantics live behind [`IntentHandler`]. Handler failures are reported to
//! the peer as Error responses and never affect the connection.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Error raised by an [`IntentHandler`] operation.
///
/// An `Application` error carries an encoded payload that is sent to the peer
/// verbatim; any other error is sent as its UTF-8 message. Neither ever
/// terminates the intent's processing stream or the connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Application-level failure with an encoded payload for the peer.
    #[error("{message}")]
    Application {
        /// Human-readable description, for logs
        message: String,
        /// Encoded error, delivered as the Error response payload
        payload: Bytes,
    },

    /// Any other failure; the peer receives the message as UTF-8 bytes.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Application-level failure carrying an encoded payload.
    pub fn application(message: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::Application {
            message: message.into(),
            payload: payload.into(),
        }
    }

    /// The bytes delivered to the peer as the Error response payload.
    pub fn into_payload(self) -> Bytes {
        match self {
            Self::Application { payload, .. } => payload,
            Self::Internal(error) => Bytes::from(error.to_string().into_bytes()),
        }
    }
}

/// The six lifecycle operations the transport applies to intents.
///
/// Operations for one intent id are invoked strictly in wire order; different
/// ids are invoked concurrently. The cancellation token fires when the owning
/// connection tears down - long-running handlers should wind down promptly,
/// the transport awaits the in-flight call before recovering.
///
/// `reset` is also invoked by the transport itself, with an empty payload,
/// for every intent left unfinished when its connection dies.
#[async_trait]
pub trait IntentHandler: Send + Sync + 'static {
    /// Start the intent's life.
    async fn open(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Add to an open intent.
    async fn amend(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Finish the intent successfully.
    async fn close(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Finish the intent as failed.
    async fn abort(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Finish the intent as expired.
    async fn timeout(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Roll the intent back. Invoked explicitly by the peer or implicitly
    /// during connection teardown.
    async fn reset(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_error_payload() {
        let error = HandlerError::application("quota exceeded", &b"{\"code\":429}"[..]);
        assert_eq!(error.to_string(), "quota exceeded");
        assert_eq!(&error.into_payload()[..], b"{\"code\":429}");
    }

    #[test]
    fn test_internal_error_payload_is_message() {
        let error = HandlerError::Internal(anyhow::anyhow!("database unreachable"));
        assert_eq!(&error.into_payload()[..], b"database unreachable");
    }
}
