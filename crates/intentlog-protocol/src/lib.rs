// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Intent Log Protocol - wire layer for the intent log transport
//!
//! This crate provides the framed TCP wire protocol spoken between intent log
//! clients and the intent log server:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    intentlog-protocol                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Messages: Request (intent id + action + payload)           │
//! │            Response (intent id + outcome + payload)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: length-prefixed frames over any async stream      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Frame format
//!
//! | Field | Width | Meaning |
//! |-------|-------|---------|
//! | IntentId | 16 bytes | UUID correlation id |
//! | Code | 1 byte | [`Action`] (request) or [`Outcome`] (response) |
//! | PayloadLength | 4 bytes | big-endian length of the payload |
//! | Payload | N bytes | opaque, handler-defined encoding |
//!
//! A clean peer close between frames surfaces as
//! [`FrameError::ConnectionClosed`]; a close in the middle of a frame is a
//! protocol error. Payloads are capped at [`frame::MAX_PAYLOAD_SIZE`].

/// Frame encoding/decoding over async streams.
pub mod frame;

/// Request and response message types.
pub mod message;

pub use frame::{FrameError, read_request, read_response, write_request, write_response};
pub use message::{Action, Outcome, Request, Response};
