// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use devfleet::config::{load_and_validate, load_from_path};
use devfleet::errors::FleetError;
use devfleet::tasks::TaskCatalog;
use devfleet::types::{PackageManager, RunStatus};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn config_error(contents: &str) -> String {
    let file = write_config(contents);
    match load_and_validate(file.path()) {
        Err(FleetError::ConfigError(msg)) => msg,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn full_example_loads_with_defaults_applied() {
    let file = write_config(
        r#"
[config]
services_directory = "checkouts"
git_interval = "0s"
package_manager = "pnpm"

[generic_task.lint]
cmd = "%{npmCommand} run lint -- %{service}"
run_if_run_status_is = ["STOPPED"]

[[service]]
name = "API_GATEWAY"
git_url = "gitlab.example.com/org/api-gateway"
port = 3000
default_branch = "develop"
generic_tasks = ["lint"]

[[service.task]]
name = "SEED_DB"
cmd = "%{npmCommand} run seed"

[[service]]
name = "WEB"
git_url = "gitlab.example.com/org/web"
package_manager = "yarn"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.service.len(), 2);
    assert_eq!(cfg.timings.git_interval, None);
    assert_eq!(cfg.timings.poll_interval, Duration::from_secs(1));
    assert_eq!(cfg.timings.readiness_poll, Duration::from_millis(250));

    let dir = file.path().parent().unwrap();
    assert_eq!(cfg.services_directory(), dir.join("checkouts"));

    let api = cfg.service("API_GATEWAY").unwrap();
    assert_eq!(api.ready_path, "/");
    assert_eq!(api.run_command, "%{npmCommand} run start");
    assert_eq!(cfg.package_manager_for(api), PackageManager::Pnpm);
    assert_eq!(
        cfg.package_manager_for(cfg.service("WEB").unwrap()),
        PackageManager::Yarn
    );

    let catalog = TaskCatalog::from_config(&cfg);
    let tasks = catalog.tasks_for(api);
    let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["lint", "SEED_DB"]);
    assert_eq!(tasks[0].run_if_run_status_is, vec![RunStatus::Stopped]);
}

#[test]
fn raw_loading_does_not_validate() {
    let file = write_config("[config]\npoll_interval = \"soon\"\n");
    let raw = load_from_path(file.path()).unwrap();
    assert!(raw.service.is_empty());
}

#[test]
fn a_config_without_services_is_rejected() {
    let msg = config_error("[config]\n");
    assert!(msg.contains("at least one"), "{msg}");
}

#[test]
fn duplicate_service_names_are_rejected() {
    let msg = config_error(
        r#"
[[service]]
name = "API"
git_url = "a/b"

[[service]]
name = "API"
git_url = "a/c"
"#,
    );
    assert!(msg.contains("duplicate service name"), "{msg}");
}

#[test]
fn unknown_generic_task_references_are_rejected() {
    let msg = config_error(
        r#"
[[service]]
name = "API"
git_url = "a/b"
generic_tasks = ["missing"]
"#,
    );
    assert!(msg.contains("unknown generic task 'missing'"), "{msg}");
}

#[test]
fn task_names_may_not_shadow_builtins() {
    let msg = config_error(
        r#"
[[service]]
name = "API"
git_url = "a/b"

[[service.task]]
name = "GIT_PULL"
cmd = "echo nope"
"#,
    );
    assert!(msg.contains("built-in"), "{msg}");
}

#[test]
fn bad_durations_are_rejected() {
    let msg = config_error(
        r#"
[config]
poll_interval = "0s"

[[service]]
name = "API"
git_url = "a/b"
"#,
    );
    assert!(msg.contains("poll_interval"), "{msg}");

    let msg = config_error(
        r#"
[config]
readiness_timeout = "forever"

[[service]]
name = "API"
git_url = "a/b"
"#,
    );
    assert!(msg.contains("readiness_timeout"), "{msg}");

    let msg = config_error(
        r#"
[config]
git_interval = "99999999999999999h"

[[service]]
name = "API"
git_url = "a/b"
"#,
    );
    assert!(msg.contains("too large"), "{msg}");
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_config("[[service]\nname = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(FleetError::TomlError(_))
    ));
}
