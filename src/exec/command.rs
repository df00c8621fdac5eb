// src/exec/command.rs

//! Shell-command provisioner.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::engine::ExecutionResult;
use crate::exec::provisioner::{ProvisionRequest, Provisioner};
use crate::types::ResourceLink;

/// Runs the resource description reference as a shell command.
///
/// Every non-empty stdout line becomes one resource link. A non-zero exit
/// status, or a command that cannot be spawned, fails the node.
#[derive(Debug, Clone, Default)]
pub struct CommandProvisioner;

impl CommandProvisioner {
    pub fn new() -> Self {
        Self
    }
}

impl Provisioner for CommandProvisioner {
    fn provision(
        &self,
        request: ProvisionRequest,
    ) -> Pin<Box<dyn Future<Output = ExecutionResult> + Send + '_>> {
        Box::pin(async move {
            let node = request.node_id.clone();
            match run_command(&request).await {
                Ok(result) => result,
                Err(err) => {
                    error!(node = %node, error = %err, "provisioning command error");
                    ExecutionResult::Failure(format!("{err:#}"))
                }
            }
        })
    }
}

async fn run_command(request: &ProvisionRequest) -> Result<ExecutionResult> {
    info!(
        node = %request.node_id,
        cmd = %request.resource_description_ref,
        "starting provisioning command"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&request.resource_description_ref);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&request.resource_description_ref);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning provisioning command for node '{}'", request.node_id))?;

    // Always consume stderr so buffers don't fill; keep the tail for errors.
    let stderr_task = child.stderr.take().map(|stderr| {
        let node = request.node_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = None;
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(node = %node, "stderr: {}", line);
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    });

    let mut links: Vec<ResourceLink> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("reading provisioning command stdout")?
        {
            let line = line.trim();
            if !line.is_empty() {
                links.push(line.to_string());
            }
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for provisioning command of node '{}'", request.node_id))?;

    let last_stderr = match stderr_task {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    };

    let code = status.code().unwrap_or(-1);
    info!(
        node = %request.node_id,
        exit_code = code,
        success = status.success(),
        links = links.len(),
        "provisioning command exited"
    );

    if status.success() {
        Ok(ExecutionResult::Success(links))
    } else {
        let message = match last_stderr {
            Some(line) => format!("command exited with status {code}: {line}"),
            None => format!("command exited with status {code}"),
        };
        Ok(ExecutionResult::Failure(message))
    }
}
