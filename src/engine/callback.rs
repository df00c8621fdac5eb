// src/engine/callback.rs

//! Callback boundary towards the task that owns a provisioning request.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::notifier::RequestOutcome;
use crate::types::{CallbackRef, FailureReason, NodeId, RequestId, ResourceLink};

/// Receiver of a request's aggregated outcome.
///
/// Implementations are invoked at most once per request and must not block.
pub trait ParentCallback: Send + Sync {
    fn succeed(&self, request: &RequestId, links: &BTreeMap<NodeId, Vec<ResourceLink>>);
    fn fail(&self, request: &RequestId, reason: &FailureReason);
}

/// Outcome of one request as forwarded by [`ChannelCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestNotification {
    pub request: RequestId,
    pub outcome: RequestOutcome,
}

/// Parent callback that forwards outcomes to a Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<RequestNotification>,
}

impl ChannelCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, request: &RequestId, outcome: RequestOutcome) {
        let notification = RequestNotification {
            request: request.clone(),
            outcome,
        };
        if self.tx.send(notification).is_err() {
            warn!(request = %request, "parent callback receiver dropped; outcome lost");
        }
    }
}

impl ParentCallback for ChannelCallback {
    fn succeed(&self, request: &RequestId, links: &BTreeMap<NodeId, Vec<ResourceLink>>) {
        self.forward(
            request,
            RequestOutcome::Succeeded {
                links: links.clone(),
            },
        );
    }

    fn fail(&self, request: &RequestId, reason: &FailureReason) {
        self.forward(
            request,
            RequestOutcome::Failed {
                reason: reason.clone(),
            },
        );
    }
}

/// Live parent callbacks, one per request in flight.
///
/// Callbacks are keyed by request id; the [`CallbackRef`] stored on nodes only
/// names the parent in logs. Several requests may share a reference and
/// still reach their own callback. A callback is removed when its outcome is
/// delivered.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<RequestId, Arc<dyn ParentCallback>>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requests: Vec<RequestId> = self
            .callbacks
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("CallbackRegistry")
            .field("requests", &requests)
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `callback` to `request` until its outcome is delivered.
    pub fn register(&self, request: RequestId, callback: Arc<dyn ParentCallback>) {
        if let Ok(mut callbacks) = self.callbacks.write() {
            if callbacks.insert(request.clone(), callback).is_some() {
                warn!(request = %request, "replaced the parent callback of a live request");
            }
        }
    }

    /// Callbacks waiting for an outcome.
    pub fn len(&self) -> usize {
        self.callbacks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke and release the callback registered for `request`.
    ///
    /// Returns `false` when no callback is registered for that request.
    pub fn deliver(
        &self,
        request: &RequestId,
        callback_ref: &CallbackRef,
        outcome: &RequestOutcome,
    ) -> bool {
        let callback = self
            .callbacks
            .write()
            .ok()
            .and_then(|mut c| c.remove(request));

        let Some(callback) = callback else {
            warn!(
                request = %request,
                callback = %callback_ref,
                "no parent callback registered; outcome dropped"
            );
            return false;
        };

        debug!(request = %request, callback = %callback_ref, "invoking parent callback");
        match outcome {
            RequestOutcome::Succeeded { links } => callback.succeed(request, links),
            RequestOutcome::Failed { reason } => callback.fail(request, reason),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_routes_outcome_to_channel() {
        let registry = CallbackRegistry::new();
        let (callback, mut rx) = ChannelCallback::new();
        registry.register(RequestId::from("r"), Arc::new(callback));

        let reason = FailureReason::execution(NodeId::from("a"), "boom");
        let outcome = RequestOutcome::Failed {
            reason: reason.clone(),
        };
        assert!(registry.deliver(&RequestId::from("r"), &CallbackRef::from("cb"), &outcome));

        let got = rx.try_recv().unwrap();
        assert_eq!(got.request, RequestId::from("r"));
        assert_eq!(got.outcome, outcome);

        // Delivered callbacks are released.
        assert!(registry.is_empty());
        assert!(!registry.deliver(&RequestId::from("r"), &CallbackRef::from("cb"), &outcome));
    }

    #[test]
    fn requests_sharing_a_reference_keep_their_own_callback() {
        let registry = CallbackRegistry::new();
        let (first, mut first_rx) = ChannelCallback::new();
        let (second, mut second_rx) = ChannelCallback::new();
        registry.register(RequestId::from("a"), Arc::new(first));
        registry.register(RequestId::from("b"), Arc::new(second));

        let shared = CallbackRef::from("parent");
        let outcome = RequestOutcome::Succeeded {
            links: BTreeMap::new(),
        };
        assert!(registry.deliver(&RequestId::from("b"), &shared, &outcome));
        assert!(registry.deliver(&RequestId::from("a"), &shared, &outcome));

        assert_eq!(first_rx.try_recv().unwrap().request, RequestId::from("a"));
        assert_eq!(second_rx.try_recv().unwrap().request, RequestId::from("b"));
        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn unknown_request_is_reported() {
        let registry = CallbackRegistry::new();
        let outcome = RequestOutcome::Succeeded {
            links: BTreeMap::new(),
        };
        assert!(!registry.deliver(&RequestId::from("nope"), &CallbackRef::from("cb"), &outcome));
    }
}
