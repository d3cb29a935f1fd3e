// src/config/mod.rs

//! Static service/task catalog.
//!
//! - [`model`] holds the serde types for the TOML file.
//! - [`loader`] reads a file and runs validation.
//! - [`validate`] implements `TryFrom<RawConfigFile> for ConfigFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, RawConfigFile, ServiceConfig, ServiceTaskConfig, TaskConfig,
    Timings,
};
