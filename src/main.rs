//! authbridge CLI
//!
//! Entry point for the `authbridge` command-line tool.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use authbridge::BridgeClient;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "authbridge")]
#[command(about = "Call allowlisted capabilities in an authbridge worker", version)]
struct Cli {
    /// Worker executable
    #[arg(long, short = 'w', global = true, default_value = "authbridge-worker")]
    worker: String,

    /// Extra argument passed to the worker (repeatable)
    #[arg(long = "worker-arg", global = true, value_name = "ARG", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call one capability and print its transport-encoded result
    Call {
        /// Dotted capability name, e.g. ed25519.sign
        #[arg(value_name = "FN")]
        fn_name: String,

        /// Arguments as JSON; binary and big integers use marker objects
        /// such as {"hexbytes":"ff"} and {"bigint":"123"}
        #[arg(default_value = "[]")]
        args: String,
    },

    /// Call capabilities listed in a file, one `FN ARGS_JSON` per line,
    /// all in flight at once
    Batch {
        /// Input file (`-` for stdin)
        #[arg(default_value = "-")]
        file: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authbridge=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = match BridgeClient::spawn(&cli.worker, &cli.worker_args) {
        Ok(client) => Arc::new(client.with_timeout(Duration::from_millis(cli.timeout_ms))),
        Err(e) => {
            eprintln!("authbridge: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ok = match cli.command {
        Commands::Call { fn_name, args } => run_call(&client, &fn_name, &args).await,
        Commands::Batch { file } => run_batch(&client, &file).await,
    };

    if let Err(e) = client.shutdown().await {
        eprintln!("authbridge: {}", e);
        return ExitCode::FAILURE;
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_call(client: &BridgeClient, fn_name: &str, args: &str) -> bool {
    let args: serde_json::Value = match serde_json::from_str(args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("authbridge: ARGS is not valid JSON: {}", e);
            return false;
        }
    };
    match client.call_raw(fn_name, args).await {
        Ok(result) => {
            println!("{}", result);
            true
        }
        Err(e) => {
            eprintln!("authbridge: {}", e);
            false
        }
    }
}

async fn run_batch(client: &Arc<BridgeClient>, file: &str) -> bool {
    let input = if file == "-" {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(file)
    };
    let input = match input {
        Ok(input) => input,
        Err(e) => {
            eprintln!("authbridge: failed to read {}: {}", file, e);
            return false;
        }
    };

    let mut calls = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (fn_name, args) = line.split_once(char::is_whitespace).unwrap_or((line, "[]"));
        match serde_json::from_str::<serde_json::Value>(args.trim()) {
            Ok(args) => calls.push((fn_name.to_string(), args)),
            Err(e) => {
                eprintln!("authbridge: line {}: ARGS is not valid JSON: {}", lineno + 1, e);
                return false;
            }
        }
    }

    let mut set = JoinSet::new();
    for (index, (fn_name, args)) in calls.into_iter().enumerate() {
        let client = Arc::clone(client);
        set.spawn(async move {
            let result = client.call_raw(&fn_name, args).await;
            (index, fn_name, result)
        });
    }

    let mut results = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(entry) => results.push(entry),
            Err(e) => {
                eprintln!("authbridge: call task failed: {}", e);
                return false;
            }
        }
    }
    results.sort_by_key(|(index, _, _)| *index);

    let mut ok = true;
    for (_, fn_name, result) in results {
        let line = match result {
            Ok(value) => json!({"fn": fn_name, "ok": true, "result": value}),
            Err(e) => {
                ok = false;
                json!({"fn": fn_name, "ok": false, "error": e.to_string()})
            }
        };
        println!("{}", line);
    }
    ok
}
