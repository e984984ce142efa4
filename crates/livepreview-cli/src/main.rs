//! LivePreview CLI
//!
//! Command-line host for the LivePreview session controller. Packs a
//! project directory, starts a sandboxed preview and streams the unified
//! log to the terminal until the stream ends or Ctrl-C.

use clap::{Parser, Subcommand};
use livepreview_core::PreviewConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod archive;
mod history;
mod project;
mod run;

/// LivePreview - run a project in a remote sandbox and watch it boot
#[derive(Parser, Debug)]
#[command(name = "livepreview")]
#[command(version, about, long_about = None)]
struct Args {
    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// JSON configuration file
    #[arg(long, global = true, env = "LIVEPREVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Sandbox API base URL
    #[arg(long, global = true, env = "LIVEPREVIEW_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the sandbox API
    #[arg(long, global = true, env = "LIVEPREVIEW_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a preview session for a project directory
    Run {
        /// Project directory
        dir: PathBuf,

        /// JSON file with prior conversation messages
        #[arg(long)]
        context: Option<PathBuf>,

        /// Save the session transcript to history when it ends
        #[arg(long)]
        record: bool,
    },

    /// Write the packaged session payload to a file
    Pack {
        dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// List the payload contents after packing
        #[arg(long)]
        inspect: bool,
    },

    /// Write a download archive of the project
    Export {
        dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Browse saved session transcripts
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// List transcripts, newest first
    List,
    /// Print one transcript
    Show { id: String },
    /// Delete one transcript
    Delete { id: String },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn load_config(args: &Args) -> livepreview_core::Result<PreviewConfig> {
    let mut config = match &args.config {
        Some(path) => PreviewConfig::load(path)?,
        None => PreviewConfig::new(),
    };
    if let Some(url) = &args.api_url {
        config = config.with_api_base_url(url.clone());
    }
    if let Some(token) = &args.token {
        config = config.with_auth_token(token.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let json_output = matches!(args.format, OutputFormat::Json);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Run {
            dir,
            context,
            record,
        } => run::run_preview(config, &dir, context.as_deref(), record, json_output).await,
        Command::Pack {
            dir,
            output,
            inspect,
        } => archive::pack(&config, &dir, &output, inspect, json_output).await,
        Command::Export { dir, output } => archive::export(&dir, &output, json_output),
        Command::History { action } => match action {
            HistoryAction::List => history::list(&config, json_output).await,
            HistoryAction::Show { id } => history::show(&config, &id, json_output).await,
            HistoryAction::Delete { id } => history::delete(&config, &id).await,
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
