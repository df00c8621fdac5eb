// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::dag::{CompositionRequest, NodeSpec, NodeWork};
use crate::types::{CallbackRef, NodeId, RequestId, StoreMode};

/// Top-level composition file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// sweep_interval = "1s"
/// default_expiration = "1h"
/// store = "memory"
///
/// [request]
/// id = "deploy-42"
/// callback = "cli"
///
/// [node.network]
/// resource = "echo /resources/networks/n1"
///
/// [node.db]
/// resource = "echo /resources/containers/db"
/// depends_on = ["network"]
/// expiration = "10m"
/// ```
///
/// All sections are optional; an empty `[node]` table is rejected during
/// validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCompositionFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub request: RequestSection,

    /// All nodes from `[node.<id>]`, keyed by node id.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// How often the runtime sweeps for expired nodes. No periodic sweep when
    /// absent.
    #[serde(default)]
    pub sweep_interval: Option<String>,

    /// Expiration of nodes without their own `expiration`, relative to
    /// submission.
    #[serde(default = "default_expiration")]
    pub default_expiration: String,

    #[serde(default)]
    pub store: StoreMode,

    /// Directory of the node documents when `store = "file"`.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

fn default_expiration() -> String {
    "1h".to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".compositor")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            sweep_interval: None,
            default_expiration: default_expiration(),
            store: StoreMode::default(),
            store_dir: default_store_dir(),
        }
    }
}

/// `[request]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSection {
    /// Request id; a random one is generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Name the parent callback is registered under.
    #[serde(default = "default_callback")]
    pub callback: String,
}

fn default_callback() -> String {
    "cli".to_string()
}

impl Default for RequestSection {
    fn default() -> Self {
        Self {
            id: None,
            callback: default_callback(),
        }
    }
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Resource description reference handed to the provisioner. A node
    /// without one only groups dependencies.
    #[serde(default)]
    pub resource: Option<String>,

    /// Nodes that must complete before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Nodes that wait for this one. Derived from every other node's
    /// `depends_on` when absent.
    #[serde(default)]
    pub dependents: Option<Vec<String>>,

    /// Per-node override of `[config].default_expiration`.
    #[serde(default)]
    pub expiration: Option<String>,
}

/// Validated `[config]` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub sweep_interval: Option<Duration>,
    pub default_expiration: Duration,
    pub store: StoreMode,
    pub store_dir: PathBuf,
}

/// One validated node, with both dependency directions resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredNode {
    pub id: NodeId,
    pub work: NodeWork,
    pub depends_on: BTreeSet<NodeId>,
    pub dependents: BTreeSet<NodeId>,
    pub expiration: Option<Duration>,
}

/// Validated composition file.
///
/// Only constructible through `TryFrom<RawCompositionFile>`.
#[derive(Debug, Clone)]
pub struct CompositionFile {
    pub settings: Settings,
    pub request_id: RequestId,
    pub callback_ref: CallbackRef,
    pub nodes: Vec<ConfiguredNode>,
}

impl CompositionFile {
    pub(crate) fn new_unchecked(
        settings: Settings,
        request_id: RequestId,
        callback_ref: CallbackRef,
        nodes: Vec<ConfiguredNode>,
    ) -> Self {
        Self {
            settings,
            request_id,
            callback_ref,
            nodes,
        }
    }

    /// The request this file describes, with expirations relative to `now`.
    pub fn to_request(&self, now: DateTime<Utc>) -> CompositionRequest {
        let mut request = CompositionRequest::new(self.request_id.clone(), self.callback_ref.clone());
        request.nodes = self
            .nodes
            .iter()
            .map(|node| {
                let ttl = node.expiration.unwrap_or(self.settings.default_expiration);
                NodeSpec {
                    id: node.id.clone(),
                    request_id: self.request_id.clone(),
                    depends_on: node.depends_on.clone(),
                    dependents: node.dependents.clone(),
                    work: node.work.clone(),
                    expiration: expiration_after(now, ttl),
                }
            })
            .collect();
        request
    }
}

/// `now + ttl`, saturating at the maximum representable instant.
fn expiration_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
