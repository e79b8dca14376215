// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test helpers: a handler that records every invocation and can be
//! told to fail or block specific calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use intentlog_core::handler::{HandlerError, IntentHandler};
use intentlog_protocol::Action;

/// One recorded handler invocation.
pub type Call = (Action, Uuid, Vec<u8>);

/// Handle releasing a blocked intent; stays open once released.
pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn release(&self) {
        let _ = self.0.send(true);
    }
}

/// Records every call in invocation order. Calls for a gated intent block
/// until the gate is released; actions in the failure set return an
/// application error with payload `error payload`.
pub struct RecordingHandler {
    calls: Mutex<Vec<Call>>,
    fail_on: Mutex<HashSet<Action>>,
    gates: Mutex<HashMap<Uuid, watch::Receiver<bool>>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Make every call for `action` fail with an application error.
    pub fn fail_on(&self, action: Action) {
        self.fail_on.lock().unwrap().insert(action);
    }

    /// Block every call for `intent_id` until the returned gate is released.
    pub fn gate_intent(&self, intent_id: Uuid) -> Gate {
        let (tx, rx) = watch::channel(false);
        self.gates.lock().unwrap().insert(intent_id, rx);
        Gate(tx)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `count` calls were recorded.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<Call> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let calls = self.calls();
            if calls.len() >= count {
                return calls;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {count} handler calls, got {calls:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn invoke(
        &self,
        action: Action,
        intent_id: Uuid,
        payload: Bytes,
    ) -> Result<(), HandlerError> {
        self.calls
            .lock()
            .unwrap()
            .push((action, intent_id, payload.to_vec()));

        let gate = self.gates.lock().unwrap().get(&intent_id).cloned();
        if let Some(mut gate) = gate {
            // A dropped gate counts as released.
            let _ = gate.wait_for(|open| *open).await;
        }

        if self.fail_on.lock().unwrap().contains(&action) {
            return Err(HandlerError::application(
                "Error message",
                &b"error payload"[..],
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IntentHandler for RecordingHandler {
    async fn open(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoke(Action::Open, intent_id, payload).await
    }

    async fn amend(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoke(Action::Amend, intent_id, payload).await
    }

    async fn close(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoke(Action::Close, intent_id, payload).await
    }

    async fn abort(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoke(Action::Abort, intent_id, payload).await
    }

    async fn timeout(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoke(Action::Timeout, intent_id, payload).await
    }

    async fn reset(
        &self,
        intent_id: Uuid,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoke(Action::Reset, intent_id, payload).await
    }
}
