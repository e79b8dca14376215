// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response messages exchanged over an intent log connection.

use bytes::Bytes;
use uuid::Uuid;

use crate::frame::FrameError;

/// Size of an intent id on the wire (UUID, RFC byte order)
pub const INTENT_ID_SIZE: usize = 16;

/// Action requested for an intent.
///
/// `Open` starts an intent's life on a connection. `Close`, `Abort` and
/// `Timeout` are final. `Ping`/`Pong` are connection keepalive and never
/// reach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    /// Start a new intent
    Open = 0,
    /// Add to an open intent
    Amend = 1,
    /// Finish an intent successfully
    Close = 2,
    /// Finish an intent as failed
    Abort = 3,
    /// Finish an intent as expired
    Timeout = 4,
    /// Roll an intent back; the id may be reused afterwards
    Reset = 5,
    /// Keepalive probe, answered with a pong echoing the payload
    Ping = 6,
    /// Keepalive answer, ignored on receipt
    Pong = 7,
}

impl Action {
    /// Whether this action ends an intent's life for good.
    pub fn is_final(self) -> bool {
        matches!(self, Action::Close | Action::Abort | Action::Timeout)
    }

    /// Whether a processed instance of this action releases server-side
    /// recovery tracking. A reset intent needs no further rollback, so it
    /// counts here even though the id may live again later.
    pub fn ends_tracking(self) -> bool {
        self.is_final() || matches!(self, Action::Reset)
    }
}

impl TryFrom<u8> for Action {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(Action::Open),
            1 => Ok(Action::Amend),
            2 => Ok(Action::Close),
            3 => Ok(Action::Abort),
            4 => Ok(Action::Timeout),
            5 => Ok(Action::Reset),
            6 => Ok(Action::Ping),
            7 => Ok(Action::Pong),
            _ => Err(FrameError::InvalidAction(value)),
        }
    }
}

/// Outcome reported for a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Outcome {
    /// The action was applied; the payload is empty
    Success = 0,
    /// The action failed; the payload carries the encoded error
    Error = 1,
    /// Server-initiated keepalive probe
    Ping = 2,
    /// Keepalive answer echoing the probe payload
    Pong = 3,
}

impl TryFrom<u8> for Outcome {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(Outcome::Success),
            1 => Ok(Outcome::Error),
            2 => Ok(Outcome::Ping),
            3 => Ok(Outcome::Pong),
            _ => Err(FrameError::InvalidOutcome(value)),
        }
    }
}

/// One inbound frame: an action requested for an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlation id of the intent, chosen by the client
    pub intent_id: Uuid,
    /// Requested action
    pub action: Action,
    /// Opaque, handler-defined payload
    pub payload: Bytes,
}

impl Request {
    /// Create a request for the given intent.
    pub fn new(intent_id: Uuid, action: Action, payload: impl Into<Bytes>) -> Self {
        Self {
            intent_id,
            action,
            payload: payload.into(),
        }
    }
}

/// One outbound frame: the outcome of a processed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Correlation id of the intent the request belonged to
    pub intent_id: Uuid,
    /// Outcome of the action
    pub outcome: Outcome,
    /// Empty on success, encoded error on failure
    pub payload: Bytes,
}

impl Response {
    /// Successful outcome with an empty payload.
    pub fn success(intent_id: Uuid) -> Self {
        Self {
            intent_id,
            outcome: Outcome::Success,
            payload: Bytes::new(),
        }
    }

    /// Failed outcome carrying an encoded error payload.
    pub fn error(intent_id: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            intent_id,
            outcome: Outcome::Error,
            payload: payload.into(),
        }
    }

    /// Keepalive answer echoing the probe payload.
    pub fn pong(intent_id: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            intent_id,
            outcome: Outcome::Pong,
            payload: payload.into(),
        }
    }
}
