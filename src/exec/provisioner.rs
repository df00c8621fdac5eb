// src/exec/provisioner.rs

//! Pluggable provisioning adapter abstraction.

use std::future::Future;
use std::pin::Pin;

use crate::engine::ExecutionResult;
use crate::types::NodeId;

/// What the provisioning adapter is asked to do for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub node_id: NodeId,
    pub resource_description_ref: String,
}

/// Trait abstracting how a node's resource is provisioned.
///
/// Production code uses [`CommandProvisioner`](super::CommandProvisioner);
/// tests provide implementations that record calls and script outcomes.
///
/// Implementations report every problem through
/// [`ExecutionResult::Failure`]; there is no separate error channel. A call
/// that never resolves leaves the node `Executing` until its expiration.
pub trait Provisioner: Send + Sync {
    fn provision(
        &self,
        request: ProvisionRequest,
    ) -> Pin<Box<dyn Future<Output = ExecutionResult> + Send + '_>>;
}
