// src/store/file.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::{CasResult, NodeStore};
use crate::dag::SubTaskNode;
use crate::errors::{CompositorError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::NodeId;

/// Node store that keeps one JSON document per node in a directory.
///
/// Writes are serialised by an in-process lock, so compare-and-swap is
/// atomic for every handle sharing this store. Documents survive a restart;
/// reopening the same directory sees the last committed version of every node.
#[derive(Debug)]
pub struct FileNodeStore {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    write_lock: Mutex<()>,
}

fn poison_err<T>(_: PoisonError<T>) -> CompositorError {
    CompositorError::storage("file store lock poisoned")
}

impl FileNodeStore {
    /// Store rooted at `dir` on the real filesystem.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::with_fs(dir, Arc::new(RealFileSystem))
    }

    pub fn with_fs(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &NodeId) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_name(id.as_str())))
    }

    fn read(&self, path: &Path) -> Result<Option<SubTaskNode>> {
        if !self.fs.exists(path) {
            return Ok(None);
        }
        let contents = self.fs.read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write(&self, path: &Path, node: &SubTaskNode) -> Result<()> {
        let contents = serde_json::to_vec_pretty(node)?;
        self.fs.write(path, &contents)?;
        Ok(())
    }
}

impl NodeStore for FileNodeStore {
    fn create_all(&self, nodes: &[SubTaskNode]) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(poison_err)?;

        if let Some(existing) = nodes.iter().find(|n| self.fs.exists(&self.path_for(&n.id))) {
            return Err(CompositorError::InvalidGraph(format!(
                "node '{}' already exists",
                existing.id
            )));
        }

        let mut written: Vec<PathBuf> = Vec::with_capacity(nodes.len());
        for node in nodes {
            let path = self.path_for(&node.id);
            if let Err(err) = self.write(&path, node) {
                // Roll back what was already written so the request is absent
                // as a whole.
                for path in &written {
                    if let Err(e) = self.fs.remove_file(path) {
                        warn!(path = ?path, error = %e, "failed to roll back node document");
                    }
                }
                return Err(err);
            }
            written.push(path);
        }

        debug!(dir = ?self.dir, count = nodes.len(), "stored new node documents");
        Ok(())
    }

    fn get(&self, id: &NodeId) -> Result<Option<SubTaskNode>> {
        self.read(&self.path_for(id))
    }

    fn compare_and_swap(&self, node: &SubTaskNode, expected_version: u64) -> Result<CasResult> {
        let _guard = self.write_lock.lock().map_err(poison_err)?;

        let path = self.path_for(&node.id);
        let Some(stored) = self.read(&path)? else {
            return Ok(CasResult::NotFound);
        };
        if stored.version != expected_version {
            return Ok(CasResult::VersionConflict {
                actual: stored.version,
            });
        }

        self.write(&path, node)?;
        Ok(CasResult::Success)
    }

    fn list(&self) -> Result<Vec<SubTaskNode>> {
        if !self.fs.is_dir(&self.dir) {
            return Ok(Vec::new());
        }

        let mut nodes = Vec::new();
        for path in self.fs.read_dir(&self.dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(node) = self.read(&path)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

/// Node ids are often link-like (`/sub-tasks/abc`); percent-encode anything
/// that is not safe in a file name.
fn encode_file_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
