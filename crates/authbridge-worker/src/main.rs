//! authbridge Worker Entrypoint
//!
//! Usage: authbridge-worker [--config worker.toml] [--allow NAME]...
//!
//! Reads line-delimited JSON RPC requests from stdin until end-of-file and
//! writes one response line per request to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use authbridge_worker::{builtins, build_handler, ShutdownPolicy, WorkerConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "authbridge-worker", version, about = "Allowlisted capability worker over stdio JSON RPC")]
struct Cli {
    /// TOML config file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Allowlisted capability name. Repeat to allow several; replaces the
    /// configured allowlist.
    #[arg(long = "allow", value_name = "NAME")]
    allow: Vec<String>,

    /// Exit at end of input without waiting for in-flight calls.
    #[arg(long)]
    fire_and_forget: bool,

    /// Print the capabilities that resolve under the effective allowlist and exit.
    #[arg(long)]
    list: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match WorkerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("authbridge-worker: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => WorkerConfig::default(),
    };
    if !cli.allow.is_empty() {
        config = config.with_allowlist(cli.allow.iter().cloned());
    }
    if cli.fire_and_forget {
        config.shutdown = ShutdownPolicy::FireAndForget;
    }
    if let Err(e) = config.validate() {
        eprintln!("authbridge-worker: {}", e);
        return ExitCode::FAILURE;
    }

    // stdout carries the protocol, so logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let handler = match build_handler(&config, builtins::namespace()) {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind capability table");
            return ExitCode::FAILURE;
        }
    };

    if cli.list {
        for name in handler.bound_names() {
            println!("{}", name);
        }
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        method = %config.method,
        capabilities = config.allowlist.len(),
        "worker ready"
    );

    match runtime.block_on(handler.run()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "RPC handler error");
            ExitCode::FAILURE
        }
    }
}
