//! Toolwire console - interactive front end for a tool/resource peer.
//!
//! Launches the peer given on the command line, negotiates a session over its
//! stdio and offers a small menu to run its tools and read its resources.

mod console;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use toolwire::{PeerCommand, Session, SessionConfig};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use console::Console;

#[derive(Parser, Debug)]
#[command(name = "toolwire")]
#[command(about = "Connect to a tool/resource peer and invoke it interactively")]
struct Args {
    /// Peer program to launch
    program: String,

    /// Arguments passed through to the peer
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Working directory for the peer
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable for the peer (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_var)]
    env: Vec<(String, String)>,

    /// Give up on a call after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log filter directive, e.g. "toolwire=trace"
    #[arg(long, conflicts_with = "debug")]
    log_filter: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_env_var(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = match &args.log_filter {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("Invalid log filter '{}'", directive))?,
        None => EnvFilter::new(if args.debug { "debug" } else { "info" }),
    };

    // stdout belongs to the menu
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}

fn peer_command(args: &Args) -> PeerCommand {
    let mut command = PeerCommand::new(&args.program).with_args(args.args.clone());
    if let Some(dir) = &args.cwd {
        command = command.with_working_dir(dir);
    }
    for (key, value) in &args.env {
        command = command.with_env(key, value);
    }
    command
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = SessionConfig::default();
    if let Some(secs) = args.timeout_secs {
        config = config.with_call_timeout(Duration::from_secs(secs));
    }

    info!("Launching peer {}", args.program);
    let session = Session::launch(&peer_command(&args), config)
        .await
        .with_context(|| format!("Failed to connect to {}", args.program))?;

    let server = session.server_info();
    println!("Connected to {} v{}", server.name, server.version);
    if let Some(instructions) = session.instructions() {
        println!("{}", instructions);
    }

    let mut console = Console::stdin();
    let outcome = tokio::select! {
        outcome = console.run(&session) => outcome,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    match session.close().await {
        Some(exit) if !exit.success => warn!("Peer ended with {}", exit),
        Some(exit) => info!("Peer ended with {}", exit),
        None => {}
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_var() {
        assert_eq!(
            parse_env_var("API_KEY=abc=def").unwrap(),
            ("API_KEY".to_string(), "abc=def".to_string())
        );
        assert_eq!(
            parse_env_var("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_var("NOVALUE").is_err());
        assert!(parse_env_var("=value").is_err());
    }

    #[test]
    fn test_trailing_args_reach_the_peer() {
        let args = Args::try_parse_from([
            "toolwire",
            "--env",
            "CITY=Oslo",
            "--timeout-secs",
            "5",
            "node",
            "server.js",
            "--verbose",
        ])
        .unwrap();

        assert_eq!(args.program, "node");
        assert_eq!(args.args, vec!["server.js", "--verbose"]);
        assert_eq!(args.timeout_secs, Some(5));

        let command = peer_command(&args);
        assert_eq!(command.program, "node");
        assert_eq!(command.args, vec!["server.js", "--verbose"]);
        assert_eq!(command.env_vars.get("CITY").map(String::as_str), Some("Oslo"));
    }

    #[test]
    fn test_debug_conflicts_with_log_filter() {
        let parsed = Args::try_parse_from(["toolwire", "--debug", "--log-filter", "trace", "node"]);
        assert!(parsed.is_err());
    }
}
