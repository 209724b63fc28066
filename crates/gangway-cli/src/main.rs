//! Gangway CLI - the `gangway` command.
//!
//! Hosts a Rhai script project on a dedicated engine thread and wires
//! the channel bus to the terminal: inbound application events print to
//! stdout, stdin lines become channel messages, and SIGINT/SIGTERM are
//! relayed to the script as a terminate event so it can shut itself
//! down.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gangway_core::{spawn_engine, Bridge, EventGateway, Project, RhaiEngine};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Gangway - embedded script engine host
#[derive(Parser, Debug)]
#[command(name = "gangway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Host for embedded Rhai script projects", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script project
    Run {
        /// Path to the project directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Arguments passed through to the script (repeatable)
        #[arg(long = "arg", value_name = "ARG")]
        args: Vec<String>,

        /// Environment entries passed through to the script (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Run { dir, args, env } => run_project(dir, args, env),
        Commands::Version => {
            println!("gangway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn parse_env(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --env entry '{}', expected KEY=VALUE", pair))?;
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn run_project(dir: PathBuf, script_args: Vec<String>, env_pairs: Vec<String>) -> Result<()> {
    let env = parse_env(&env_pairs)?;
    let project = Project::resolve(&dir)
        .with_context(|| format!("failed to resolve project {}", dir.display()))?;
    let spec = project
        .launch_spec(&script_args, &env)
        .context("failed to build launch spec")?;
    log::info!("running {}", project.main_script().display());

    let bridge = Arc::new(Bridge::new(Box::new(RhaiEngine::new())));
    let gateway = EventGateway::new(bridge.clone());

    gateway.set_event_handler(|event, args| {
        let rendered = serde_json::to_string(&args).unwrap_or_else(|_| "[]".to_string());
        println!("{}\t{}", event, rendered);
    });
    gateway.when_ready(|| log::info!("script ready"));

    // Relay termination signals as an app event; there is no abort
    // primitive, the script decides when to exit.
    let signal_gateway = gateway.clone();
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    thread::spawn(move || {
        for signal in signals.forever() {
            log::info!("received signal {}, asking script to terminate", signal);
            signal_gateway.request_terminate();
        }
    });

    // stdin lines of the form `channel<TAB>message` become raw sends.
    let stdin_bridge = bridge.clone();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            match line.split_once('\t') {
                Some((channel, message)) => stdin_bridge.send(channel, message),
                None => log::warn!("ignoring stdin line without a channel: '{}'", line),
            }
        }
    });

    let engine = spawn_engine(bridge, spec).context("failed to spawn engine thread")?;
    engine.join().context("engine thread failed")?;
    log::info!("script finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pairs() {
        let env = parse_env(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(env.get("A").unwrap(), "1");
        assert_eq!(env.get("B").unwrap(), "x=y");
    }

    #[test]
    fn test_parse_env_rejects_missing_separator() {
        assert!(parse_env(&["NOPE".to_string()]).is_err());
    }
}
