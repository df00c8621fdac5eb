use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use compositor::engine::ExecutionResult;
use compositor::exec::{ProvisionRequest, Provisioner};
use compositor::types::NodeId;

/// What the fake does when asked to provision a given node.
#[derive(Debug, Clone)]
enum Script {
    Fail(String),
    Delay(Duration),
    Hang,
}

/// A fake provisioner that:
/// - records which nodes were provisioned, in call order
/// - succeeds with the single link `link://<resource>` by default
/// - can be scripted per node to fail, to answer late, or to never answer.
///
/// Clones share the recorded calls and the script.
#[derive(Debug, Clone, Default)]
pub struct FakeProvisioner {
    executed: Arc<Mutex<Vec<NodeId>>>,
    scripts: Arc<Mutex<HashMap<NodeId, Script>>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Failure(message)` for `node`.
    pub fn failing(self, node: &str, message: &str) -> Self {
        self.script(node, Script::Fail(message.to_string()))
    }

    /// Succeed for `node`, but only after `delay`.
    pub fn delayed(self, node: &str, delay: Duration) -> Self {
        self.script(node, Script::Delay(delay))
    }

    /// Never answer for `node`.
    pub fn hanging(self, node: &str) -> Self {
        self.script(node, Script::Hang)
    }

    fn script(self, node: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(NodeId::from(node), script);
        self
    }

    /// Nodes provisioned so far, in call order.
    pub fn executed(&self) -> Vec<NodeId> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_names(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    pub fn execution_count(&self, node: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == node)
            .count()
    }

    /// The link a successful call for `resource` reports.
    pub fn link_for(resource: &str) -> String {
        format!("link://{resource}")
    }
}

impl Provisioner for FakeProvisioner {
    fn provision(
        &self,
        request: ProvisionRequest,
    ) -> Pin<Box<dyn Future<Output = ExecutionResult> + Send + '_>> {
        Box::pin(async move {
            self.executed.lock().unwrap().push(request.node_id.clone());
            let script = self.scripts.lock().unwrap().get(&request.node_id).cloned();

            match script {
                Some(Script::Fail(message)) => ExecutionResult::Failure(message),
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Delay(delay)) => {
                    tokio::time::sleep(delay).await;
                    ExecutionResult::Success(vec![Self::link_for(&request.resource_description_ref)])
                }
                None => {
                    ExecutionResult::Success(vec![Self::link_for(&request.resource_description_ref)])
                }
            }
        })
    }
}
