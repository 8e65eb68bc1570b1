//! `odlc` — compile an ODL source file and print its IR.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use odl_compiler::{compile_with_config, dump_ir_to_spec, Config};

#[derive(Parser)]
#[command(name = "odlc", about = "Compile ODL source into its typed IR", version)]
struct Cli {
    /// Path to a TOML config file (falls back to config.toml / config.local.toml / env if unset)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source file and print its IR as JSON.
    Compile {
        /// Path to the ODL source file (YAML).
        source: PathBuf,

        /// Pretty-print the output JSON.
        #[arg(long)]
        pretty: bool,
    },
}

fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::from_file(&p.to_string_lossy()).context("loading config file"),
        None => Config::load().context("loading config"),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging.level, &config.logging.format);

    match cli.command {
        Command::Compile { source, pretty } => {
            let text = fs::read_to_string(&source)
                .with_context(|| format!("reading '{}'", source.display()))?;
            let ir = compile_with_config(&text, &config)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("compiling '{}'", source.display()))?;
            let spec = dump_ir_to_spec(&ir);
            let rendered = if pretty {
                serde_json::to_string_pretty(&spec)?
            } else {
                serde_json::to_string(&spec)?
            };
            println!("{rendered}");
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
