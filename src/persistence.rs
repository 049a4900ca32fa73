//! Atomic JSON persistence for the solution manifest.
//!
//! The Blackboard saves `solution_manifest.json` after every mutating
//! operation (§6). A bare `File::create` followed by a write leaves a
//! truncated file on the disk if the process dies mid-write; write to a
//! sibling temp file and rename over the target instead, since rename is
//! atomic on the same filesystem.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;

pub fn write_atomic_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let body = fs::read(path.as_ref())?;
    Ok(serde_json::from_slice(&body)?)
}
