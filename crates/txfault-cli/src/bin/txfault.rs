//! Command-line front end for txfault sessions.
//!
//! # Usage
//!
//! ```bash
//! # Replay a session against the in-process injector
//! txfault run session.json
//!
//! # Override the injector seed
//! txfault run session.json --seed 7
//!
//! # Only show which injector calls the session would make
//! txfault run session.json --dry-run
//!
//! # Show how a failinfo literal is encoded
//! txfault encode bigint 1234567890123
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=debug` to trace
//! every hook and injector call.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::error::Error;
use std::path::PathBuf;
use txfault::controller::{Controller, ControllerBuilder};
use txfault::injector::RecordingInjector;
use txfault::payload::{encode, Value};
use txfault_cli::script::{load_script, Script, ScriptError, Session, SessionInjector};

#[derive(Parser)]
#[command(name = "txfault")]
#[command(about = "Transaction-scoped fault injection sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON session script.
    Run {
        /// Path to the session script.
        script: PathBuf,

        /// Override the injector seed from the script's config.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Record injector calls instead of evaluating points.
        #[arg(long)]
        dry_run: bool,

        /// Stop at the first failing step.
        #[arg(long)]
        fail_fast: bool,
    },

    /// Encode a failinfo literal and print its payload.
    Encode {
        /// Declared type, e.g. "integer", "text", "numeric".
        type_name: String,

        /// Literal value.
        literal: String,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            seed,
            dry_run,
            fail_fast,
        } => cmd_run(script, seed, dry_run, fail_fast),
        Commands::Encode { type_name, literal } => cmd_encode(&type_name, &literal),
    }
}

fn cmd_run(path: PathBuf, seed: Option<u64>, dry_run: bool, fail_fast: bool) {
    let mut script = match load_script(&path) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", path.display(), report(&e));
            std::process::exit(1);
        }
    };
    if let Some(seed) = seed {
        script.config.seed = seed;
    }
    info!(
        "Loaded {} ({} steps, {} predicates)",
        path.display(),
        script.steps.len(),
        script.predicates.len()
    );

    let failed = if dry_run {
        let controller =
            ControllerBuilder::new(script.config.clone(), RecordingInjector::new()).build();
        replay(controller, &script, fail_fast)
    } else {
        let controller = Controller::new(script.config.clone());
        replay(controller, &script, fail_fast)
    };

    if failed {
        std::process::exit(1);
    }
}

/// Run the script and print its output.  Returns whether any step failed.
fn replay<I: SessionInjector>(controller: Controller<I>, script: &Script, fail_fast: bool) -> bool {
    let mut session = Session::new(controller, &script.predicates);
    let result = session.run(&script.steps, fail_fast);

    for line in session.output() {
        println!("{line}");
    }
    let report_lines = session.controller().injector().report();
    if !report_lines.is_empty() {
        println!();
        for line in report_lines {
            println!("{line}");
        }
    }

    match result {
        Ok(summary) => {
            println!();
            println!("{} steps, {} errors", summary.steps, summary.errors);
            summary.errors > 0
        }
        Err(e) => {
            eprintln!("Error: {}", report(&e));
            true
        }
    }
}

fn cmd_encode(type_name: &str, literal: &str) {
    let encoded = match Value::parse(type_name, literal).and_then(|value| encode(&value)) {
        Ok(encoded) => encoded,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("description: {}", encoded.description);
    match encoded.payload {
        Some(payload) => {
            println!("payload:     {payload:?}");
            if let Some(word) = payload.slot_word() {
                println!("slot word:   {word:#x}");
            }
            println!("bytes:       {:02x?}", payload.to_bytes());
        }
        None => println!("payload:     none"),
    }
}

/// Render an error with its source chain.
fn report(error: &ScriptError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
