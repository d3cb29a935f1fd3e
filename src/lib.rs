// src/lib.rs

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod git;
pub mod logging;
pub mod logs;
pub mod reconcile;
pub mod registry;
pub mod tasks;
pub mod types;

use std::collections::HashMap;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::engine::Engine;
use crate::registry::CheckoutLayout;
use crate::tasks::{TaskCatalog, TaskOutcome};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the engine (registry, broadcaster, orchestrator, loops)
/// - the selected CLI mode
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    info!(config = %args.config.display(), services = cfg.service.len(), "configuration loaded");

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let engine = Engine::with_real_backends(cfg);

    if args.status {
        return engine::print_status(engine).await;
    }

    let outcome = match (&args.run, &args.script, &args.service) {
        (Some(task), _, Some(service)) => {
            let attributes: HashMap<String, String> = args.attributes.iter().cloned().collect();
            engine::run_task(engine, task, service, attributes).await?
        }
        (None, Some(script), Some(service)) => engine::run_script(engine, service, script).await?,
        _ => return engine::run_daemon(engine).await,
    };

    match outcome {
        TaskOutcome::Failed(reason) => bail!("task failed: {reason}"),
        TaskOutcome::Succeeded | TaskOutcome::Skipped(_) => Ok(()),
    }
}

/// Simple dry-run output: print services, their checkout folders and tasks.
fn print_dry_run(cfg: &ConfigFile) {
    let catalog = TaskCatalog::from_config(cfg);

    println!("devfleet dry-run");
    println!(
        "  config.services_directory = {}",
        cfg.services_directory().display()
    );
    println!("  config.package_manager = {:?}", cfg.config.package_manager);
    println!("  config.install_after_clone = {}", cfg.config.install_after_clone);
    println!();

    println!("built-in tasks:");
    for task in catalog.tasks() {
        println!("  - {}", task.name);
    }
    let branch_tasks: Vec<_> = catalog.branch_tasks().iter().map(|t| t.as_str()).collect();
    println!("  branch tasks: {}", branch_tasks.join(", "));
    println!();

    println!("services ({}):", cfg.service.len());
    for service in cfg.service.iter() {
        println!("  - {}", service.name);
        println!("      git_url: {}", service.git_url);
        println!("      folder: {}", CheckoutLayout::folder_name(&service.name));
        println!("      run_command: {}", service.run_command);
        if let Some(port) = service.port {
            println!("      port: {port} (ready_path: {})", service.ready_path);
        }
        if let Some(ref branch) = service.default_branch {
            println!("      default_branch: {branch}");
        }
        println!("      package_manager: {:?}", cfg.package_manager_for(service));
        for task in catalog.tasks_for(service) {
            println!("      task {}: {}", task.name, task.command);
        }
    }

    debug!("dry-run complete (no execution)");
}
