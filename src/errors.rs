// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Unknown task type: {0}")]
    UnknownTask(String),

    #[error("Unknown checkout transport: {0}")]
    UnknownCheckoutTransport(String),

    #[error("Task {task} is not runnable for service {service}: {reason}")]
    TaskNotRunnable {
        task: String,
        service: String,
        reason: String,
    },

    #[error("Task {task} is already running for service {service}")]
    TaskAlreadyRunning { task: String, service: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;
