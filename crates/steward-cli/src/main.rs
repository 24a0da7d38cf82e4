// steward-cli/src/main.rs
// ============================================================================
// Module: Steward CLI Entry Point
// Description: Command dispatcher for declarative fleet configuration runs.
// Purpose: Drive the reconciliation engine against a remote control plane.
// Dependencies: clap, steward-client, steward-core, thiserror, url
// ============================================================================

//! ## Overview
//! The steward CLI applies a set of YAML configuration documents against a
//! fleet-management control plane. One invocation is one reconciliation run:
//! strictly ordered, global document first, with an optional dry-run mode
//! that validates and simulates without mutating the server.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use steward_client::HttpClient;
use steward_client::HttpClientConfig;
use steward_core::CancelToken;
use steward_core::Engine;
use steward_core::RunOptions;
use steward_core::StatusSink;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "steward", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply declarative configuration documents to the control plane.
    Gitops(GitopsCommand),
}

/// Arguments for the gitops command.
#[derive(Args, Debug)]
struct GitopsCommand {
    /// Configuration file to apply; repeat for multiple files.
    #[arg(short = 'f', long = "filename", value_name = "PATH", required = true)]
    filenames: Vec<PathBuf>,
    /// Validate and simulate without changing anything on the server.
    #[arg(long)]
    dry_run: bool,
    /// Delete remote teams not named by any provided file.
    #[arg(long)]
    delete_other_teams: bool,
    /// Base URL of the control plane.
    #[arg(long, value_name = "URL", env = "STEWARD_URL")]
    url: String,
    /// API token used for authentication.
    #[arg(long, value_name = "TOKEN", env = "STEWARD_TOKEN", hide_env_values = true)]
    token: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Gitops(command) => command_gitops(command),
    }
}

// ============================================================================
// SECTION: Gitops Command
// ============================================================================

/// Runs one reconciliation pass over the provided files.
fn command_gitops(command: GitopsCommand) -> CliResult<ExitCode> {
    let base_url = Url::parse(&command.url)
        .map_err(|err| CliError::new(format!("invalid server url {}: {err}", command.url)))?;
    let client = HttpClient::new(HttpClientConfig::new(base_url, command.token))
        .map_err(|err| CliError::new(err.to_string()))?;

    let options = RunOptions {
        filenames: command.filenames,
        dry_run: command.dry_run,
        delete_other_teams: command.delete_other_teams,
    };
    let engine = Engine::new(&client, CancelToken::new());
    let mut sink = StdoutSink;
    engine
        .run(&options, &mut sink)
        .map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Status sink that writes progress lines to stdout.
struct StdoutSink;

impl StatusSink for StdoutSink {
    fn line(&mut self, message: &str) {
        // Output failures must not abort a run in flight.
        let _ = write_stdout_line(message);
    }
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Prints an error message and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}

// ============================================================================
// SECTION: Tests
// ============================================================================
