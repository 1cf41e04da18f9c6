// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Orbit - load CommonJS modules from the network
//!
//! This is the main entry point for the orbit CLI/REPL.
//!
//! ## Features
//!
//! - Load one module and print its exports as JSON
//! - Resolve identifiers to canonical locations
//! - Interactive REPL with history and a live module cache

mod repl;

use anyhow::Context;
use clap::Parser;
use orbit_loader::{DefaultTransport, DirectiveSandbox, Loader, LoaderConfig, VERSION};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(
    name = "orbit",
    about = "CommonJS module loader for network-hosted code",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Module identifier to load (starts the REPL when omitted)
    id: Option<String>,

    /// Module root for bare identifiers
    #[arg(short = 'r', long)]
    root: Option<String>,

    /// Base location the module root resolves against
    #[arg(short = 'b', long)]
    base: Option<Url>,

    /// Configuration file (defaults to ./orbit.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Load through the non-blocking path
    #[arg(long = "async")]
    non_blocking: bool,

    /// Print the canonical location instead of loading
    #[arg(long)]
    resolve: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "orbit=debug,orbit_loader=debug"
    } else {
        "orbit=warn,orbit_loader=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file (or `orbit.toml`), then `ORBIT_*` variables, then flags
fn load_config(cli: &Cli) -> anyhow::Result<LoaderConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = LoaderConfig::from_file(path)?;
            config.merge_env(std::env::vars())?;
            config
        }
        None => LoaderConfig::load()?,
    };
    if let Some(base) = &cli.base {
        config.base = base.clone();
    }
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    tracing::debug!("Loader config: base={} root={}", config.base, config.root);
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let loader = Loader::new(
        config,
        Arc::new(DefaultTransport::new()?),
        Arc::new(DirectiveSandbox::new()),
    );

    match &cli.id {
        Some(id) if cli.resolve => {
            let location = if cli.non_blocking {
                resolve_async(&runtime, &loader, id)?
            } else {
                loader.require().resolve(id)?
            };
            println!("{location}");
        }
        Some(id) => {
            let exports = if cli.non_blocking {
                require_async(&runtime, &loader, id)?
            } else {
                loader.require().require(id)?
            };
            println!("{}", serde_json::to_string_pretty(&exports.get())?);
        }
        None => {
            let mut repl = repl::Repl::new(loader)?;
            repl.run()?;
        }
    }
    Ok(())
}

/// Issue the load on `runtime` and wait for its continuation.
///
/// Module bodies issue blocking requires, which must stay off the runtime
/// workers, so the continuation is driven on a blocking thread.
fn require_async(runtime: &Runtime, loader: &Loader, id: &str) -> anyhow::Result<orbit_loader::Exports> {
    let continuation = {
        let _guard = runtime.enter();
        loader.require().require_async(id)
    };
    let task = runtime.spawn_blocking(move || futures::executor::block_on(continuation));
    Ok(runtime.block_on(task)??)
}

fn resolve_async(runtime: &Runtime, loader: &Loader, id: &str) -> anyhow::Result<Url> {
    let continuation = {
        let _guard = runtime.enter();
        loader.require().resolve_async(id)
    };
    Ok(runtime.block_on(continuation)?)
}
