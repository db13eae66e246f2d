//! Command-line surface and option layering.
//!
//! Options come from three layers: command-line flags, the manifest's `custom.sfsim` section and
//! built-in defaults. Flags win over the manifest, and the manifest wins over defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde_json::Value;
use sfsim_engine::{CommandSpec, Manifest, SimulatorOptions};

pub fn build_cli() -> Command {
    Command::new("sfsim")
        .about("Run Step Functions state machines locally")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the manifest (defaults to $SFSIM_CONFIG, then serverless.yml)"),
        )
        .arg(
            Arg::new("map-concurrency")
                .long("map-concurrency")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(usize))
                .help("Default Map concurrency when a state sets no MaxConcurrency"),
        )
        .arg(
            Arg::new("invoker")
                .long("invoker")
                .global(true)
                .action(ArgAction::Set)
                .value_name("PROGRAM")
                .help("Program spawned for every Task invocation"),
        )
        .arg(
            Arg::new("invoker-arg")
                .long("invoker-arg")
                .global(true)
                .action(ArgAction::Append)
                .allow_hyphen_values(true)
                .help("Argument passed to the invoker program (repeatable)"),
        )
        .subcommand(Command::new("list").about("List state machines declared in the manifest"))
        .subcommand(Command::new("validate").about("Load and validate every state machine"))
        .subcommand(
            Command::new("run")
                .about("Run a state machine to completion")
                .arg(Arg::new("name").required(true).help("State machine name"))
                .arg(
                    Arg::new("input")
                        .long("input")
                        .short('i')
                        .action(ArgAction::Set)
                        .conflicts_with("input-file")
                        .help("Execution input as JSON text"),
                )
                .arg(
                    Arg::new("input-file")
                        .long("input-file")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(PathBuf))
                        .help("File holding the execution input"),
                )
                .arg(
                    Arg::new("events")
                        .long("events")
                        .action(ArgAction::SetTrue)
                        .help("Print lifecycle events to stderr as JSON lines"),
                ),
        )
}

/// Options given on the command line.
pub fn cli_options(matches: &ArgMatches) -> SimulatorOptions {
    let invoker = matches.get_one::<String>("invoker").map(|program| {
        let args = matches.get_many::<String>("invoker-arg").into_iter().flatten().cloned();
        CommandSpec::new(program.clone()).with_args(args)
    });
    SimulatorOptions {
        default_map_concurrency: matches.get_one::<usize>("map-concurrency").copied(),
        invoker,
    }
}

/// Layers command-line options over the manifest's and anchors the invoker in the manifest directory.
pub fn resolve_options(cli: SimulatorOptions, manifest: &Manifest) -> SimulatorOptions {
    let mut options = cli.merge(manifest.options.clone());
    if let Some(invoker) = options.invoker.as_mut() {
        invoker.working_dir = match (invoker.working_dir.take(), manifest.base_dir.as_deref()) {
            (Some(dir), Some(base)) if dir.is_relative() => Some(base.join(dir)),
            (Some(dir), _) => Some(dir),
            (None, base) => base.map(Path::to_path_buf),
        };
    }
    options
}

/// Execution input from `--input` or `--input-file`; an empty object when neither is given.
pub fn read_input(matches: &ArgMatches) -> Result<Value> {
    if let Some(text) = matches.get_one::<String>("input") {
        return serde_json::from_str(text).context("--input is not valid JSON");
    }
    if let Some(path) = matches.get_one::<PathBuf>("input-file") {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read input file {}", path.display()))?;
        return serde_json::from_str(&text).with_context(|| format!("input file {} is not valid JSON", path.display()));
    }
    Ok(Value::Object(Default::default()))
}

pub fn require_invoker(options: &SimulatorOptions) -> Result<CommandSpec> {
    match &options.invoker {
        Some(spec) => Ok(spec.clone()),
        None => bail!("no handler invoker configured; pass --invoker or set custom.sfsim.invoker in the manifest"),
    }
}
