// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::model::{
    CompositionFile, ConfiguredNode, NodeConfig, RawCompositionFile, Settings,
};
use crate::dag::{DependencyGraph, NodeWork};
use crate::errors::{CompositorError, Result};
use crate::types::{CallbackRef, NodeId, RequestId};

impl TryFrom<RawCompositionFile> for CompositionFile {
    type Error = CompositorError;

    fn try_from(raw: RawCompositionFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_nodes(&raw)?;
        let settings = validate_settings(&raw)?;
        let request_id = raw
            .request
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(RequestId::from)
            .unwrap_or_else(|| RequestId::new(Uuid::new_v4().to_string()));
        let callback_ref = CallbackRef::new(raw.request.callback.trim());
        if callback_ref.as_str().is_empty() {
            return Err(config_error("[request].callback must not be empty"));
        }

        let nodes = resolve_nodes(&raw.node)?;
        let file = CompositionFile::new_unchecked(settings, request_id, callback_ref, nodes);

        // Same checks a submitted request goes through.
        DependencyGraph::build(&file.to_request(Utc::now()))?;

        Ok(file)
    }
}

fn config_error(msg: impl Into<String>) -> CompositorError {
    CompositorError::ConfigError(msg.into())
}

fn ensure_has_nodes(raw: &RawCompositionFile) -> Result<()> {
    if raw.node.is_empty() {
        return Err(config_error(
            "composition must contain at least one [node.<id>] section",
        ));
    }
    Ok(())
}

fn validate_settings(raw: &RawCompositionFile) -> Result<Settings> {
    let cfg = &raw.config;

    let sweep_interval = match cfg.sweep_interval.as_deref() {
        Some(s) => {
            let every = parse_duration(s)
                .map_err(|e| config_error(format!("invalid [config].sweep_interval: {e}")))?;
            if every.is_zero() {
                return Err(config_error("[config].sweep_interval must be > 0"));
            }
            Some(every)
        }
        None => None,
    };

    let default_expiration = parse_duration(&cfg.default_expiration)
        .map_err(|e| config_error(format!("invalid [config].default_expiration: {e}")))?;

    Ok(Settings {
        sweep_interval,
        default_expiration,
        store: cfg.store,
        store_dir: cfg.store_dir.clone(),
    })
}

/// Turn `[node.*]` sections into nodes with both dependency directions.
///
/// `dependents` given explicitly are kept as written (the graph check
/// rejects them if they do not mirror `depends_on`); absent ones are derived.
fn resolve_nodes(raw: &BTreeMap<String, NodeConfig>) -> Result<Vec<ConfiguredNode>> {
    let mut derived: BTreeMap<&str, BTreeSet<NodeId>> = BTreeMap::new();
    for (id, node) in raw {
        for dep in &node.depends_on {
            derived
                .entry(dep.as_str())
                .or_default()
                .insert(NodeId::from(id.as_str()));
        }
    }

    raw.iter()
        .map(|(id, node)| {
            if id.trim().is_empty() {
                return Err(config_error("node ids must not be empty"));
            }

            let work = match node.resource.as_deref().map(str::trim) {
                Some("") => {
                    return Err(config_error(format!(
                        "node '{id}' has an empty `resource`; omit it for a dependency-only node"
                    )));
                }
                Some(resource) => NodeWork::Provision {
                    resource_description_ref: resource.to_string(),
                },
                None => NodeWork::DependencyOnly,
            };

            let dependents = match &node.dependents {
                Some(explicit) => explicit.iter().map(|d| NodeId::from(d.as_str())).collect(),
                None => derived.get(id.as_str()).cloned().unwrap_or_default(),
            };

            let expiration = node
                .expiration
                .as_deref()
                .map(|s| {
                    parse_duration(s).map_err(|e| {
                        config_error(format!("invalid expiration for node '{id}': {e}"))
                    })
                })
                .transpose()?;

            Ok(ConfiguredNode {
                id: NodeId::from(id.as_str()),
                work,
                depends_on: node
                    .depends_on
                    .iter()
                    .map(|d| NodeId::from(d.as_str()))
                    .collect(),
                dependents,
                expiration,
            })
        })
        .collect()
}

/// Parse a duration string like `"500ms"`, `"3s"`, `"10m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
