use std::{
    fs,
    path::{Path, PathBuf},
};

use arborist_hasher::Poseidon;
use arborist_merkle_tree::{IncrementalMerkleTree, TreeSnapshot};
use tracing::{debug, info};

use crate::{errors::ArboristError, types::QueueKind, utils::root_prefix};

pub const TREE_HEIGHT: usize = 20;

/// Off-chain replica of a registry tree. Only ever compared against the
/// registry root, never trusted on its own.
pub type LocalTreeMirror = IncrementalMerkleTree<Poseidon, TREE_HEIGHT>;

pub fn snapshot_path(dir: &Path, queue: QueueKind) -> PathBuf {
    dir.join(format!("{}_tree.json", queue))
}

pub fn load_snapshot(path: &Path) -> Result<Option<LocalTreeMirror>, ArboristError> {
    if !path.exists() {
        debug!("No tree snapshot at {:?}", path);
        return Ok(None);
    }
    let snapshot_error = |error: String| ArboristError::Snapshot {
        path: path.to_path_buf(),
        error,
    };
    let content = fs::read_to_string(path).map_err(|e| snapshot_error(e.to_string()))?;
    let snapshot: TreeSnapshot =
        serde_json::from_str(&content).map_err(|e| snapshot_error(e.to_string()))?;
    let mirror = LocalTreeMirror::from_snapshot(snapshot)?;
    info!(
        "Loaded tree snapshot from {:?}: next_index {}, root {}",
        path,
        mirror.next_index(),
        root_prefix(&mirror.root())
    );
    Ok(Some(mirror))
}

/// Writes the snapshot next to `path` first and renames it into place, so a
/// crash never leaves a truncated snapshot behind.
pub fn save_snapshot(mirror: &LocalTreeMirror, path: &Path) -> Result<(), ArboristError> {
    let snapshot_error = |error: String| ArboristError::Snapshot {
        path: path.to_path_buf(),
        error,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| snapshot_error(e.to_string()))?;
    }
    let content =
        serde_json::to_string(&mirror.snapshot()).map_err(|e| snapshot_error(e.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).map_err(|e| snapshot_error(e.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|e| snapshot_error(e.to_string()))?;
    debug!(
        "Saved tree snapshot to {:?} at next_index {}",
        path,
        mirror.next_index()
    );
    Ok(())
}
