//! ComfyBridge CLI Entry Point
//!
//! Provides a command-line interface for the two bridge operations:
//! supervising a local ComfyUI server and importing workflow exports.
//!
//! # Usage
//!
//! ```bash
//! # Launch and supervise the local server (reads COMFYUI_* env vars)
//! comfybridge serve
//!
//! # With a custom readiness timeout
//! comfybridge serve --timeout 120
//!
//! # Import a workflow export into an in-memory graph and print it
//! comfybridge import workflow.json
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use log::{error, info};

use comfybridge::host::MemoryGraph;
use comfybridge::import::import_file;
use comfybridge::server::{ServerConfig, ServerStatus, Supervisor};
use comfybridge::{APP_NAME, VERSION};

/// Default readiness timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Timeout for stopping the server on exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while supervising a running server.
const SUPERVISE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the invocation asks for.
#[derive(Debug)]
enum Action {
    Serve,
    Import(PathBuf),
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    action: Action,
    timeout_secs: u64,
    json: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Host <-> ComfyUI Bridge");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: comfybridge [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  serve                Launch and supervise the local ComfyUI server");
    println!("  import <FILE>        Import a workflow JSON export");
    println!();
    println!("Options:");
    println!("  --timeout SECS      Readiness timeout for serve (default: {})", DEFAULT_TIMEOUT_SECS);
    println!("  --json              Print the import result as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Environment:");
    println!("  COMFYUI_DIR         Path to the ComfyUI checkout (required for serve)");
    println!("  COMFYUI_PYTHON      Interpreter override");
    println!("  COMFYUI_IP          Bind address (default: 127.0.0.1)");
    println!("  COMFYUI_PORT        Bind port (default: 8188)");
    println!("  COMFYUI_FLAGS       Extra server flags");
    println!();
    println!("Examples:");
    println!("  COMFYUI_DIR=~/ComfyUI comfybridge serve");
    println!("  comfybridge import my_workflow.json");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut action: Option<Action> = None;
    let mut timeout_secs = DEFAULT_TIMEOUT_SECS;
    let mut json = false;
    let mut verbose = false;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--json" => {
                json = true;
            }
            "--timeout" => {
                i += 1;
                if i >= args.len() {
                    return Err("--timeout requires a number argument".to_string());
                }
                timeout_secs = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid timeout value: {}", args[i]))?;
            }
            "serve" if action.is_none() => {
                action = Some(Action::Serve);
            }
            "import" if action.is_none() => {
                i += 1;
                if i >= args.len() {
                    return Err("import requires a workflow file argument".to_string());
                }
                action = Some(Action::Import(PathBuf::from(&args[i])));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                return Err(format!("Unexpected argument: {}", arg));
            }
        }
        i += 1;
    }

    let action = action.ok_or_else(|| "No command given (expected 'serve' or 'import')".to_string())?;

    Ok(Config {
        action,
        timeout_secs,
        json,
        verbose,
    })
}

/// Launches the server and supervises it until it exits.
fn run_serve(timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let supervisor = Supervisor::new(ServerConfig::from_env());
    supervisor.set_status_listener(|status| info!("Server status: {}", status));

    supervisor.launch();

    match supervisor.wait_until_ready(timeout) {
        ServerStatus::Running => {
            if let Some(url) = supervisor.server_url() {
                info!("Server ready at {}", url);
            }
        }
        ServerStatus::AlreadyRunning => {
            info!("Server was already running");
        }
        status => {
            return Err(format!("Server failed to start (status: {})", status).into());
        }
    }

    info!("Supervising server (Ctrl-C to exit; the server is stopped on exit)");
    loop {
        thread::sleep(SUPERVISE_POLL_INTERVAL);
        match supervisor.status() {
            ServerStatus::Stopped => {
                info!("Server exited");
                break;
            }
            ServerStatus::Error => {
                supervisor.stop(STOP_TIMEOUT);
                return Err("Server failed while running".into());
            }
            _ => {}
        }
    }

    Ok(())
}

/// JSON view of an import, for `--json` output.
#[derive(serde::Serialize)]
struct ImportReport<'a> {
    summary: comfybridge::ImportSummary,
    nodes: &'a [comfybridge::host::MemoryNode],
}

/// Imports a workflow file into an in-memory graph and prints it.
fn run_import(path: &PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut graph = MemoryGraph::new();

    let summary = import_file(&mut graph, path).map_err(|e| {
        error!("Import failed: {}", e);
        e
    })?;

    if json {
        let report = ImportReport {
            summary,
            nodes: graph.nodes(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", summary);
    println!();
    for node in graph.nodes() {
        let wired: Vec<String> = node
            .inputs
            .iter()
            .flatten()
            .filter_map(|src| graph.node(*src))
            .map(|src| src.name.clone())
            .collect();

        if wired.is_empty() {
            println!("  {} [{}] at ({}, {})", node.name, node.kind.host_class(), node.x, node.y);
        } else {
            println!(
                "  {} [{}] at ({}, {}) <- {}",
                node.name,
                node.kind.host_class(),
                node.x,
                node.y,
                wired.join(", ")
            );
        }
    }

    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    match config.action {
        Action::Serve => run_serve(Duration::from_secs(config.timeout_secs)),
        Action::Import(ref path) => run_import(path, config.json),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
