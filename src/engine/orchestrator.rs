// src/engine/orchestrator.rs

//! Caller-facing handle of a running [`Runtime`](super::Runtime).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::info;

use crate::dag::CompositionRequest;
use crate::errors::{CompositorError, Result};
use crate::types::RequestId;

use super::callback::{CallbackRegistry, ParentCallback};
use super::core::{CoreCommand, CoreRuntime};
use super::RuntimeEvent;

/// Submits requests to the runtime and registers their parent callbacks.
///
/// Cheap to clone; every clone talks to the same runtime.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    core: Arc<CoreRuntime>,
    callbacks: Arc<CallbackRegistry>,
    tx: mpsc::Sender<RuntimeEvent>,
}

impl Orchestrator {
    pub(crate) fn new(
        core: Arc<CoreRuntime>,
        callbacks: Arc<CallbackRegistry>,
        tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            core,
            callbacks,
            tx,
        }
    }

    /// Validate and persist a provisioning request and start every node of it.
    ///
    /// `callback` receives the aggregated outcome exactly once. Invalid graphs
    /// are rejected before anything is stored and the callback is never
    /// registered.
    pub async fn submit(
        &self,
        request: CompositionRequest,
        callback: Arc<dyn ParentCallback>,
    ) -> Result<RequestId> {
        let events = self.core.create_request(&request)?;
        self.callbacks.register(request.request_id.clone(), callback);

        info!(
            request = %request.request_id,
            nodes = request.nodes.len(),
            "submitting composition request"
        );
        self.send_all(events).await?;
        Ok(request.request_id)
    }

    /// Continue a request whose nodes are already in the store, e.g. after a
    /// restart with a file-backed store.
    pub async fn resume(
        &self,
        request_id: &RequestId,
        callback: Arc<dyn ParentCallback>,
    ) -> Result<()> {
        let step = self.core.resume_request(request_id)?;
        self.callbacks.register(request_id.clone(), callback);

        for command in step.commands {
            match command {
                CoreCommand::Deliver(events) => self.send_all(events).await?,
                CoreCommand::NotifyParent {
                    request,
                    callback_ref,
                    outcome,
                } => {
                    self.callbacks.deliver(&request, &callback_ref, &outcome);
                }
                CoreCommand::Execute(_) => {}
            }
        }
        Ok(())
    }

    /// Ask the runtime to fail every node that expired at or before `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        self.send(RuntimeEvent::SweepRequested { now }).await
    }

    /// Ask the runtime to stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    /// Parent callbacks still waiting for their request's outcome.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    async fn send_all(&self, events: Vec<RuntimeEvent>) -> Result<()> {
        for event in events {
            self.send(event).await?;
        }
        Ok(())
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CompositorError::RuntimeStopped)
    }
}
