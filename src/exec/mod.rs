// src/exec/mod.rs

//! Provisioning adapter layer.
//!
//! The runtime hands every node whose unit of work is due to a
//! [`Provisioner`] and feeds the returned [`ExecutionResult`] back into the
//! core as an `ExecutionFinished` event.
//!
//! - [`provisioner`] provides the `Provisioner` trait.
//! - [`command`] provides `CommandProvisioner`, which treats the resource
//!   description reference as a shell command and collects resource links
//!   from its stdout. Tests replace it with a fake implementation.
//!
//! [`ExecutionResult`]: crate::engine::ExecutionResult

pub mod command;
pub mod provisioner;

pub use command::CommandProvisioner;
pub use provisioner::{ProvisionRequest, Provisioner};
