// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{CompositionFile, Settings};
use crate::dag::{DependencyGraph, NodeWork};
use crate::engine::{
    ChannelCallback, CoreRuntime, RequestOutcome, Runtime, RuntimeOptions,
};
use crate::exec::CommandProvisioner;
use crate::store::{FileNodeStore, InMemoryNodeStore, NodeStore};
use crate::types::{NodeId, StoreMode};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - composition file loading
/// - node store (memory or file)
/// - core runtime, async runtime and shell-command provisioner
/// - Ctrl-C handling
///
/// The request described by the file is submitted (or resumed, when a file
/// store already holds its nodes) and its outcome is printed to stdout, one
/// `node<TAB>link` line per resource link.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone();
    let file = load_and_validate(&config_path)
        .with_context(|| format!("loading composition file {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&file)?;
        return Ok(());
    }

    let store = open_store(&file.settings)?;
    let already_stored = !store.list_request(&file.request_id)?.is_empty();

    let options = RuntimeOptions {
        exit_when_idle: true,
        sweep_interval: file.settings.sweep_interval,
        ..RuntimeOptions::default()
    };
    let (runtime, orchestrator) =
        Runtime::new(CoreRuntime::new(store), CommandProvisioner::new(), options);
    let runtime_handle = tokio::spawn(runtime.run());

    let (callback, mut outcomes) = ChannelCallback::new();
    let callback = Arc::new(callback);

    if already_stored {
        info!(request = %file.request_id, "resuming stored request");
        orchestrator.resume(&file.request_id, callback).await?;
    } else {
        let request = file.to_request(Utc::now());
        orchestrator.submit(request, callback).await?;
    }

    let wait = async {
        tokio::select! {
            notification = outcomes.recv() => notification,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("interrupted; stopping");
                None
            }
        }
    };

    let notification = match args.timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(notification) => notification,
            Err(_) => {
                let _ = orchestrator.shutdown().await;
                let _ = runtime_handle.await;
                bail!(
                    "timed out after {limit:?} waiting for request {}",
                    file.request_id
                );
            }
        },
        None => wait.await,
    };

    // The runtime may already have stopped on its own once idle.
    let _ = orchestrator.shutdown().await;
    runtime_handle.await.context("joining runtime task")??;

    let Some(notification) = notification else {
        bail!("request {} did not finish", file.request_id);
    };

    match notification.outcome {
        RequestOutcome::Succeeded { links } => {
            for (node, node_links) in &links {
                for link in node_links {
                    println!("{node}\t{link}");
                }
            }
            debug!(request = %notification.request, "request succeeded");
            Ok(())
        }
        RequestOutcome::Failed { reason } => {
            bail!("request {} failed: {reason}", notification.request)
        }
    }
}

fn open_store(settings: &Settings) -> Result<Arc<dyn NodeStore>> {
    let store: Arc<dyn NodeStore> = match settings.store {
        StoreMode::Memory => Arc::new(InMemoryNodeStore::new()),
        StoreMode::File => {
            let store = FileNodeStore::open(settings.store_dir.clone());
            info!(dir = %store.dir().display(), "using file-backed node store");
            Arc::new(store)
        }
    };
    Ok(store)
}

/// Simple dry-run output: print nodes in dependency order with their work.
fn print_dry_run(file: &CompositionFile) -> Result<()> {
    let request = file.to_request(Utc::now());
    let graph = DependencyGraph::build(&request)?;

    println!("compositor dry-run");
    println!("  request = {}", file.request_id);
    println!("  callback = {}", file.callback_ref);
    println!("  store = {:?}", file.settings.store);
    if let Some(every) = file.settings.sweep_interval {
        println!("  sweep_interval = {every:?}");
    }
    println!();

    println!("nodes ({}):", graph.len());
    for id in graph.topological_order() {
        println!("  - {id}");
        if let Some(spec) = request.node(id) {
            match &spec.work {
                NodeWork::Provision {
                    resource_description_ref,
                } => println!("      resource: {resource_description_ref}"),
                NodeWork::DependencyOnly => println!("      dependency-only"),
            }
            let deps: Vec<&str> = graph
                .dependencies_of(id)
                .into_iter()
                .map(NodeId::as_str)
                .collect();
            if !deps.is_empty() {
                println!("      depends_on: {deps:?}");
            }
            println!("      expires: {}", spec.expiration.to_rfc3339());
        }
    }

    debug!("dry-run complete (nothing provisioned)");
    Ok(())
}
