//! nodeloop - run CommonJS programs on the Boa JS engine
//!
//! The entry file is loaded with `require()`, then the event loop runs until
//! no timers or immediates remain.

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};

use boa_engine::Source;
use nodeloop::cli::{Repl, ReplConfig};
use nodeloop::{EventLoop, LoopConfig, LoopError, Registry};

#[derive(Parser)]
#[command(name = "nodeloop")]
#[command(author, version, about = "Node.js-style require() and event loop on Boa")]
struct Cli {
    /// JavaScript file to execute
    file: Option<PathBuf>,

    /// Evaluate code from the command line
    #[arg(short, long)]
    eval: Option<String>,

    /// Do not install the global console object
    #[arg(long)]
    no_console: bool,

    /// Extra folder searched for packages after node_modules (repeatable)
    #[arg(long = "global-folder", value_name = "DIR")]
    global_folders: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a file with the event loop (timers, promises)
    Run {
        /// JavaScript file to run
        file: PathBuf,
    },
    /// Start an interactive REPL
    Repl,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "nodeloop=debug"
    } else {
        "nodeloop=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = loop_config(&cli)?;

    match cli.command {
        Some(Commands::Run { file }) => run_file(config, &file),
        Some(Commands::Repl) => run_repl(config),
        None => {
            if let Some(code) = cli.eval {
                eval_code(config, code)
            } else if let Some(file) = cli.file {
                run_file(config, &file)
            } else {
                run_repl(config)
            }
        }
    }
}

fn loop_config(cli: &Cli) -> Result<LoopConfig> {
    let base_dir = std::env::current_dir().into_diagnostic()?;
    let registry = Registry::builder()
        .global_folders(cli.global_folders.iter().cloned())
        .base_dir(base_dir)
        .build();
    Ok(LoopConfig {
        enable_console: !cli.no_console,
        registry,
    })
}

/// Start the interactive REPL
fn run_repl(config: LoopConfig) -> Result<()> {
    let mut repl = Repl::with_config(config, ReplConfig::default()).into_diagnostic()?;
    repl.run().into_diagnostic()?;
    Ok(())
}

/// Load `path` as the main module and run the loop to completion
fn run_file(config: LoopConfig, path: &Path) -> Result<()> {
    let request = std::fs::canonicalize(path)
        .into_diagnostic()?
        .to_string_lossy()
        .into_owned();

    let event_loop = EventLoop::with_config(config).into_diagnostic()?;
    let result = event_loop.run(move |context| nodeloop::require(context, &request).map(|_| ()));
    exit_on_script_error(result)
}

/// Evaluate code from the command line and print its value
fn eval_code(config: LoopConfig, code: String) -> Result<()> {
    let event_loop = EventLoop::with_config(config).into_diagnostic()?;
    let result = event_loop.run(move |context| {
        let value = context.eval(Source::from_bytes(code.as_bytes()).with_path(Path::new("eval.js")))?;
        if !value.is_undefined() {
            println!("{}", value.display());
        }
        Ok(())
    });
    exit_on_script_error(result)
}

fn exit_on_script_error(result: Result<(), LoopError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(LoopError::Script(message)) => {
            eprintln!("{}: {}", "Error".red(), message);
            std::process::exit(1);
        }
        Err(e) => Err(e).into_diagnostic(),
    }
}
