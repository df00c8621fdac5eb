// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dag::NodeWork;
use crate::errors::Result;
use crate::exec::{ProvisionRequest, Provisioner};

use super::callback::CallbackRegistry;
use super::core::CoreRuntime;
use super::orchestrator::Orchestrator;
use super::{CoreCommand, ExecutionResult, RuntimeEvent, RuntimeOptions, ScheduledNode};

/// Feeds `RuntimeEvent`s into the core and carries out the commands it
/// returns: provisioning calls, follow-up deliveries and parent callbacks.
///
/// Each event is handled on its own Tokio task, so events for different
/// nodes (and different requests) proceed concurrently and a slow
/// provisioner never holds up unrelated work. All semantics live in
/// [`CoreRuntime`]; this struct only does async IO.
pub struct Runtime<P: Provisioner + 'static> {
    shell: Arc<Shell<P>>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    options: RuntimeOptions,
}

/// State shared by every event-handling task.
struct Shell<P> {
    core: Arc<CoreRuntime>,
    callbacks: Arc<CallbackRegistry>,
    provisioner: P,
    event_tx: mpsc::Sender<RuntimeEvent>,
    exit_when_idle: bool,
}

impl<P: Provisioner + 'static> fmt::Debug for Runtime<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.shell.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<P: Provisioner + 'static> Runtime<P> {
    /// Build the runtime around `core` and return it together with the
    /// handle callers use to submit requests.
    pub fn new(core: CoreRuntime, provisioner: P, options: RuntimeOptions) -> (Self, Orchestrator) {
        let (event_tx, event_rx) = mpsc::channel(options.channel_capacity.max(1));
        let core = Arc::new(core);
        let callbacks = Arc::new(CallbackRegistry::new());

        let orchestrator =
            Orchestrator::new(Arc::clone(&core), Arc::clone(&callbacks), event_tx.clone());

        let shell = Arc::new(Shell {
            core,
            callbacks,
            provisioner,
            event_tx,
            exit_when_idle: options.exit_when_idle,
        });

        (
            Self {
                shell,
                event_rx,
                options,
            },
            orchestrator,
        )
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s until `ShutdownRequested` arrives.
    /// - Spawns one handler task per event.
    /// - Optionally emits periodic expiration sweeps.
    ///
    /// Handler tasks still running at shutdown (typically provisioning calls
    /// in flight) are aborted; their nodes stay `Executing` in the store and
    /// are dispatched again when the request is resumed.
    pub async fn run(mut self) -> Result<()> {
        info!("compositor runtime started");

        let sweeper = self
            .options
            .sweep_interval
            .map(|every| spawn_sweeper(self.shell.event_tx.clone(), every));

        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                maybe_event = self.event_rx.recv() => {
                    let Some(event) = maybe_event else {
                        info!("runtime event channel closed; exiting");
                        break;
                    };

                    if matches!(event, RuntimeEvent::ShutdownRequested) {
                        info!("shutdown requested; stopping runtime");
                        break;
                    }

                    debug!(?event, "runtime received event");
                    let shell = Arc::clone(&self.shell);
                    handlers.spawn(async move { shell.handle(event).await });
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            error!(error = %err, "event handler panicked");
                        }
                    }
                }
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        if !handlers.is_empty() {
            debug!(in_flight = handlers.len(), "aborting in-flight event handlers");
        }
        handlers.shutdown().await;

        info!("runtime exiting");
        Ok(())
    }
}

impl<P: Provisioner> Shell<P> {
    async fn handle(&self, event: RuntimeEvent) {
        let step = self.core.step(event);
        for command in step.commands {
            self.execute_command(command).await;
        }
    }

    /// Execute a single command from the core.
    async fn execute_command(&self, command: CoreCommand) {
        match command {
            CoreCommand::Execute(node) => self.execute(node).await,
            CoreCommand::Deliver(events) => {
                for event in events {
                    self.send(event).await;
                }
            }
            CoreCommand::NotifyParent {
                request,
                callback_ref,
                outcome,
            } => {
                info!(
                    request = %request,
                    success = outcome.is_success(),
                    "notifying parent"
                );
                self.callbacks.deliver(&request, &callback_ref, &outcome);

                if self.exit_when_idle && self.core.is_idle() {
                    info!("all requests finished; requesting shutdown");
                    self.send(RuntimeEvent::ShutdownRequested).await;
                }
            }
        }
    }

    async fn execute(&self, scheduled: ScheduledNode) {
        let result = match scheduled.work {
            NodeWork::DependencyOnly => {
                debug!(node = %scheduled.node, "dependency-only node; nothing to provision");
                ExecutionResult::Success(Vec::new())
            }
            NodeWork::Provision {
                resource_description_ref,
            } => {
                debug!(
                    node = %scheduled.node,
                    request = %scheduled.request,
                    "dispatching to provisioner"
                );
                self.provisioner
                    .provision(ProvisionRequest {
                        node_id: scheduled.node.clone(),
                        resource_description_ref,
                    })
                    .await
            }
        };

        self.send(RuntimeEvent::ExecutionFinished {
            node: scheduled.node,
            result,
        })
        .await;
    }

    async fn send(&self, event: RuntimeEvent) {
        if let Err(err) = self.event_tx.send(event).await {
            warn!(event = ?err.0, "runtime stopped; dropping event");
        }
    }
}

fn spawn_sweeper(tx: mpsc::Sender<RuntimeEvent>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx
                .send(RuntimeEvent::SweepRequested { now: Utc::now() })
                .await
                .is_err()
            {
                break;
            }
        }
    })
}
