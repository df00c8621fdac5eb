// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{CompositionFile, RawCompositionFile};
use crate::errors::Result;

/// Load a composition file from a given path and return the raw
/// `RawCompositionFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph correctness, durations, etc.). Use [`load_and_validate`]
/// for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawCompositionFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let file: RawCompositionFile = toml::from_str(&contents)?;

    Ok(file)
}

/// Load a composition file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Parses durations, derives missing `dependents`, and runs the same
///   dependency graph checks a submitted request goes through.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<CompositionFile> {
    let raw = load_from_path(&path)?;
    let file = CompositionFile::try_from(raw)?;
    Ok(file)
}

/// `Compositor.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Compositor.toml")
}
