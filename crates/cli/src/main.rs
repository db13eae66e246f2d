use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use sfsim_engine::{CommandInvoker, EngineServices, Manifest, load_manifest, manifest_path};
use sfsim_types::StateDefinition;
use tracing::{Level, info, warn};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = config::build_cli().get_matches();
    let path = manifest_path(matches.get_one::<PathBuf>("config").map(PathBuf::as_path));

    match matches.subcommand() {
        Some(("list", _)) => {
            let manifest = load_manifest(&path)?;
            list_state_machines(&manifest);
            Ok(())
        }
        Some(("validate", _)) => {
            let manifest = load_manifest(&path)?;
            validate_state_machines(&manifest);
            Ok(())
        }
        Some(("run", sub)) => {
            let manifest = load_manifest(&path)?;
            run_state_machine(&matches, sub, manifest).await
        }
        _ => bail!("expected a subcommand: list, validate or run"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_max_level(Level::INFO)
        .try_init();
}

fn list_state_machines(manifest: &Manifest) {
    if manifest.state_machines.is_empty() {
        println!("No state machines declared");
        return;
    }
    for (name, definition) in &manifest.state_machines {
        println!("{name} (starts at {})", definition.start_at);
    }
}

fn validate_state_machines(manifest: &Manifest) {
    // load_manifest already rejects invalid definitions; report what was accepted.
    for (name, definition) in &manifest.state_machines {
        let tasks = definition
            .states
            .values()
            .filter(|state| matches!(state, StateDefinition::Task(_)))
            .count();
        println!("{name}: ok ({} states, {tasks} tasks)", definition.states.len());
    }
    let bound = manifest.bindings.len();
    println!("{} state machine(s) valid, {bound} task binding(s)", manifest.state_machines.len());
}

async fn run_state_machine(root: &ArgMatches, sub: &ArgMatches, manifest: Manifest) -> Result<()> {
    let name = sub.get_one::<String>("name").context("missing state machine name")?.clone();
    let input = config::read_input(sub)?;

    let options = config::resolve_options(config::cli_options(root), &manifest);
    let invoker = CommandInvoker::new(config::require_invoker(&options)?);
    let services = EngineServices::new(manifest.bindings.clone(), invoker).with_default_map_concurrency(options.map_concurrency());
    let simulator = manifest.into_simulator(services)?;

    let mut handle = simulator.start_execution(&name, input)?;
    info!(state_machine = %name, execution_id = %handle.execution_id(), "execution started");

    if sub.get_flag("events")
        && let Some(mut events) = handle.take_events()
    {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("{line}"),
                    Err(error) => warn!(error = %error, "failed to encode execution event"),
                }
            }
        });
    }

    let cancel = handle.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling execution");
            cancel.cancel();
        }
    });

    match handle.wait().await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(error) => {
            let cause = error.failure_cause().unwrap_or_default();
            bail!("execution failed: {} {}", error.error_name(), cause)
        }
    }
}
