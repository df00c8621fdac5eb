// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of one sub-task node, stable for the node's lifetime.
    NodeId
);

string_id!(
    /// Identifier of a provisioning request; shared by all of its nodes.
    RequestId
);

string_id!(
    /// Opaque handle naming the parent callback of a request.
    CallbackRef
);

/// Identifier of a resource produced by a successful execution.
pub type ResourceLink = String;

/// Why a node ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The provisioning adapter reported failure.
    Execution,
    /// The node outlived its expiration and was swept.
    Timeout,
}

/// The originating error carried by a failed node.
///
/// Cascaded failures keep the reason of the node where the failure started,
/// so `origin` is not necessarily the node that holds the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub origin: NodeId,
    pub message: String,
}

impl FailureReason {
    pub fn execution(origin: NodeId, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Execution,
            origin,
            message: message.into(),
        }
    }

    pub fn timeout(origin: NodeId) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("sub-task {origin} expired before reaching a terminal state"),
            origin,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Execution => "execution failure",
            FailureKind::Timeout => "timeout",
        };
        write!(f, "{kind} in {}: {}", self.origin, self.message)
    }
}

/// Where node documents are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// One JSON document per node under `store_dir`.
    File,
    /// In memory only (lost on restart).
    Memory,
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::Memory
    }
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StoreMode::File),
            "memory" => Ok(StoreMode::Memory),
            other => Err(format!(
                "invalid store: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reason_names_origin() {
        let reason = FailureReason::timeout(NodeId::from("db"));
        assert_eq!(reason.kind, FailureKind::Timeout);
        assert!(reason.to_string().contains("db"));
    }

    #[test]
    fn store_mode_parses_case_insensitively() {
        assert_eq!("File".parse::<StoreMode>(), Ok(StoreMode::File));
        assert_eq!(" memory ".parse::<StoreMode>(), Ok(StoreMode::Memory));
        assert!("disk".parse::<StoreMode>().is_err());
    }
}
