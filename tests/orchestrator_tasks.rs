// tests/orchestrator_tasks.rs

mod common;
use crate::common::builders::{ConfigBuilder, ServiceBuilder, TaskBuilder};
use crate::common::{Fixture, drain, init_tracing, status_pulses, with_timeout};

use devfleet::errors::FleetError;
use devfleet::exec::CommandOutput;
use devfleet::tasks::TaskOutcome;
use devfleet::types::RunStatus;

fn fleet() -> ConfigBuilder {
    ConfigBuilder::new()
        .generic_task(
            "lint",
            TaskBuilder::new("%{npmCommand} run lint -- %{service}").when_status(&[RunStatus::Stopped]),
        )
        .service(
            ServiceBuilder::new("API_GATEWAY")
                .git_url("git.example.com/org/api-gateway")
                .generic_task("lint")
                .task("SEED_DB", TaskBuilder::new("%{npmCommand} run seed"))
                .task("BOOTSTRAP", TaskBuilder::new("echo %{service}").if_not_cloned()),
        )
        .service(ServiceBuilder::new("WEB"))
}

#[tokio::test]
async fn unknown_task_is_rejected_and_leaves_no_running_marker() {
    init_tracing();
    let fx = Fixture::new(fleet());
    fx.make_cloned("API_GATEWAY");

    let err = fx.execute("DEPLOY_TO_MARS", "API_GATEWAY", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownTask(ref t) if t == "DEPLOY_TO_MARS"));
    assert!(fx.registry().running_tasks("API_GATEWAY").unwrap().is_empty());
    assert!(fx.backend.calls().is_empty());
    fx.shutdown().await;
}

#[tokio::test]
async fn unknown_service_is_an_error() {
    let fx = Fixture::new(fleet());
    let err = fx.execute("GIT_PULL", "NOPE", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::ServiceNotFound(_)));
    fx.shutdown().await;
}

#[tokio::test]
async fn running_marker_is_cleared_after_success_and_failure() {
    init_tracing();
    let fx = Fixture::new(fleet());
    let checkout = fx.make_cloned("API_GATEWAY");
    let mut rx = fx.engine.subscribe();

    let outcome = fx.execute("SEED_DB", "API_GATEWAY", &[]).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert!(fx.registry().running_tasks("API_GATEWAY").unwrap().is_empty());
    assert_eq!(status_pulses(&drain(&mut rx)), 2, "one pulse on start, one on finish");

    fx.backend.respond("npm run seed", CommandOutput::failed(1, "seed failed"));
    let outcome = fx.execute("SEED_DB", "API_GATEWAY", &[]).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Failed("exited with code 1".into()));
    assert!(fx.registry().running_tasks("API_GATEWAY").unwrap().is_empty());

    let calls = fx.backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.streamed && c.cwd == checkout));
    fx.shutdown().await;
}

#[tokio::test]
async fn a_task_already_running_is_not_started_twice() {
    let fx = Fixture::new(fleet());
    fx.make_cloned("API_GATEWAY");
    assert!(fx.registry().add_running_task("API_GATEWAY", "SEED_DB").unwrap());

    let err = fx.execute("SEED_DB", "API_GATEWAY", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskAlreadyRunning { .. }));
    assert_eq!(
        fx.registry().running_tasks("API_GATEWAY").unwrap(),
        vec!["SEED_DB".to_string()]
    );
    assert!(fx.backend.calls().is_empty());
    fx.shutdown().await;
}

#[tokio::test]
async fn templates_are_substituted_in_generic_tasks() {
    let fx = Fixture::new(fleet());
    fx.make_cloned("API_GATEWAY");

    let outcome = fx.execute("lint", "API_GATEWAY", &[]).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert_eq!(fx.backend.commands(), vec!["npm run lint -- API_GATEWAY"]);

    // WEB did not opt into the generic task.
    fx.make_cloned("WEB");
    let err = fx.execute("lint", "WEB", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownTask(_)));
    fx.shutdown().await;
}

#[tokio::test]
async fn eligibility_follows_clone_state_and_run_status() {
    let fx = Fixture::new(fleet());

    // Not cloned yet.
    let err = fx.execute("NPM_INSTALL", "API_GATEWAY", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));
    let err = fx.execute("STOP_SERVICE", "API_GATEWAY", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));

    // Tasks for uncloned services run from the services root.
    let outcome = fx.execute("BOOTSTRAP", "API_GATEWAY", &[]).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert_eq!(fx.backend.calls()[0].cwd, fx.registry().services_root());

    fx.make_cloned("API_GATEWAY");
    let err = fx.execute("GIT_CLONE", "API_GATEWAY", &[("gitCheckoutType", "ssh")]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));
    let err = fx.execute("BOOTSTRAP", "API_GATEWAY", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));

    fx.registry().set_run_status("API_GATEWAY", RunStatus::Running).unwrap();
    let err = fx.execute("lint", "API_GATEWAY", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));
    fx.shutdown().await;
}

#[tokio::test]
async fn clone_over_ssh_uses_the_scp_style_url() {
    init_tracing();
    let fx = Fixture::new(fleet());

    let outcome = fx
        .execute("GIT_CLONE", "API_GATEWAY", &[("gitCheckoutType", "ssh")])
        .await
        .unwrap();
    assert_eq!(outcome, TaskOutcome::Succeeded);

    let calls = fx.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].display,
        "git clone git@git.example.com:org/api-gateway.git api-gateway"
    );
    assert_eq!(calls[0].cwd, fx.registry().services_root());
    assert!(fx.registry().services_root().is_dir());
    fx.shutdown().await;
}

#[tokio::test]
async fn clone_attribute_errors_are_configuration_errors() {
    let fx = Fixture::new(fleet());

    let err = fx
        .execute("GIT_CLONE", "API_GATEWAY", &[("gitCheckoutType", "ftp")])
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::UnknownCheckoutTransport(ref t) if t == "ftp"));

    let err = fx
        .execute("GIT_CLONE", "API_GATEWAY", &[("gitCheckoutType", "https+basicauth")])
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));

    assert!(fx.backend.calls().is_empty());
    assert!(fx.registry().running_tasks("API_GATEWAY").unwrap().is_empty());
    fx.shutdown().await;
}

#[tokio::test]
async fn basic_auth_credentials_are_masked_in_log_lines() {
    let fx = Fixture::new(fleet());
    let mut rx = fx.engine.subscribe();

    fx.execute(
        "GIT_CLONE",
        "API_GATEWAY",
        &[("gitCheckoutType", "https+basicauth"), ("basicAuth", "me:s3cret")],
    )
    .await
    .unwrap();
    fx.notifier().flush().await;

    let text = drain(&mut rx)
        .iter()
        .map(|m| serde_json::to_string(m).unwrap())
        .collect::<String>();
    assert!(text.contains("https://***@git.example.com/org/api-gateway"));
    assert!(!text.contains("s3cret"));
    fx.shutdown().await;
}

#[tokio::test]
async fn remove_deletes_the_checkout_and_resets_branch_fields() {
    let fx = Fixture::new(fleet());
    let checkout = fx.make_cloned("API_GATEWAY");
    fx.registry().set_branch("API_GATEWAY", "develop").unwrap();
    fx.registry().set_ahead_behind("API_GATEWAY", 1, 4).unwrap();

    let outcome = fx.execute("REMOVE_SERVICE", "API_GATEWAY", &[]).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert!(!checkout.exists());

    let branch = fx.registry().branch_state("API_GATEWAY").unwrap();
    assert_eq!(branch.branch, None);
    assert_eq!((branch.ahead, branch.behind), (0, 0));
    assert!(!fx.registry().is_cloned("API_GATEWAY"));
    fx.shutdown().await;
}

#[tokio::test]
async fn package_scripts_are_listed_and_run() {
    let fx = Fixture::new(fleet());
    let checkout = fx.make_cloned("WEB");
    std::fs::write(
        checkout.join("package.json"),
        r#"{ "name": "web", "scripts": { "build": "vite build", "test": "vitest" } }"#,
    )
    .unwrap();

    let scripts = fx.orchestrator().list_scripts("WEB").await.unwrap();
    assert_eq!(scripts, vec!["build".to_string(), "test".to_string()]);

    let outcome = with_timeout(fx.orchestrator().run_script("WEB", "build")).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert_eq!(fx.backend.commands(), vec!["npm run build"]);

    let status = fx.registry().find("WEB").unwrap();
    assert!(status.running_tasks.is_empty());
    assert_eq!(status.running_script, None);

    let err = fx.orchestrator().run_script("WEB", "deploy").await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotRunnable { .. }));
    fx.shutdown().await;
}

#[tokio::test]
async fn missing_package_json_lists_no_scripts() {
    let fx = Fixture::new(fleet());
    fx.make_cloned("WEB");
    assert!(fx.orchestrator().list_scripts("WEB").await.unwrap().is_empty());
    fx.shutdown().await;
}
