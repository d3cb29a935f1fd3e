// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{ConfigFile, ConfigSection, RawConfigFile, Timings};
use crate::errors::{FleetError, Result};
use crate::tasks::BuiltinTask;
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::FleetError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let timings = validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, timings))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<Timings> {
    ensure_has_services(cfg)?;
    validate_services(cfg)?;
    validate_task_names(cfg)?;
    validate_generic_task_references(cfg)?;
    parse_timings(&cfg.config)
}

fn ensure_has_services(cfg: &RawConfigFile) -> Result<()> {
    if cfg.service.is_empty() {
        return Err(FleetError::ConfigError(
            "config must contain at least one [[service]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_services(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for service in cfg.service.iter() {
        if service.name.trim().is_empty() {
            return Err(FleetError::ConfigError(
                "service name must not be empty".to_string(),
            ));
        }
        if !seen.insert(service.name.as_str()) {
            return Err(FleetError::ConfigError(format!(
                "duplicate service name '{}'",
                service.name
            )));
        }
        if service.git_url.trim().is_empty() {
            return Err(FleetError::ConfigError(format!(
                "service '{}' has an empty git_url",
                service.name
            )));
        }
    }
    Ok(())
}

fn validate_task_names(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.generic_task.keys() {
        ensure_not_builtin(name, "generic task")?;
    }

    for service in cfg.service.iter() {
        let mut seen = HashSet::new();
        for task in service.task.iter() {
            if task.name.trim().is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "service '{}' declares a task with an empty name",
                    service.name
                )));
            }
            ensure_not_builtin(&task.name, "task")?;
            if !seen.insert(task.name.as_str()) {
                return Err(FleetError::ConfigError(format!(
                    "service '{}' declares task '{}' twice",
                    service.name, task.name
                )));
            }
        }
    }
    Ok(())
}

fn ensure_not_builtin(name: &str, kind: &str) -> Result<()> {
    if BuiltinTask::from_name(name).is_some() {
        return Err(FleetError::ConfigError(format!(
            "{kind} '{name}' collides with a built-in task name"
        )));
    }
    Ok(())
}

fn validate_generic_task_references(cfg: &RawConfigFile) -> Result<()> {
    for service in cfg.service.iter() {
        for generic in service.generic_tasks.iter() {
            if !cfg.generic_task.contains_key(generic) {
                return Err(FleetError::ConfigError(format!(
                    "service '{}' references unknown generic task '{}'",
                    service.name, generic
                )));
            }
        }
    }
    Ok(())
}

fn parse_timings(section: &ConfigSection) -> Result<Timings> {
    let poll_interval = parse_field("poll_interval", &section.poll_interval)?;
    let git_interval = parse_field("git_interval", &section.git_interval)?;
    let readiness_timeout = parse_field("readiness_timeout", &section.readiness_timeout)?;
    let readiness_poll = parse_field("readiness_poll", &section.readiness_poll)?;
    let log_flush_interval = parse_field("log_flush_interval", &section.log_flush_interval)?;

    for (field, value) in [
        ("poll_interval", poll_interval),
        ("readiness_poll", readiness_poll),
        ("log_flush_interval", log_flush_interval),
    ] {
        if value.is_zero() {
            return Err(FleetError::ConfigError(format!(
                "[config].{field} must be greater than zero"
            )));
        }
    }

    Ok(Timings {
        poll_interval,
        git_interval: (!git_interval.is_zero()).then_some(git_interval),
        readiness_timeout,
        readiness_poll,
        log_flush_interval,
    })
}

fn parse_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| FleetError::ConfigError(format!("[config].{field}: {e}")))
}
