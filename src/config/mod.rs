// src/config/mod.rs

//! DAG definition files.
//!
//! - [`model`] is the TOML-backed data model.
//! - [`validate`] checks what the DAG builder cannot see.
//! - [`loader`] reads a file and builds the validated `Dag` together with
//!   the engine and local-runner settings.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{LoadedConfig, LocalConfig, load_and_validate, load_from_path, load_from_str};
pub use model::RawConfigFile;
pub use validate::validate_raw_config;
