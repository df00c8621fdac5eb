// src/config/mod.rs

//! Composition file loading and validation for compositor.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a composition file from disk (`loader.rs`).
//! - Validate it into a [`CompositionFile`] (`validate.rs`), including the
//!   dependency graph checks every submitted request goes through.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    CompositionFile, ConfigSection, ConfiguredNode, NodeConfig, RawCompositionFile,
    RequestSection, Settings,
};
pub use validate::parse_duration;
