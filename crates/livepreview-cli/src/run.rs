//! `livepreview run`

use livepreview_core::{
    HttpSandboxClient, Phase, PreviewConfig, PreviewController, Result, StdoutEventSink,
};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::project;

/// Run one preview session in the foreground. The session is stopped when
/// its stream ends or on Ctrl-C.
pub async fn run_preview(
    mut config: PreviewConfig,
    dir: &Path,
    context: Option<&Path>,
    record: bool,
    json_output: bool,
) -> Result<ExitCode> {
    let files = project::load_project(dir)?;
    let conversation = match context {
        Some(path) => project::load_conversation(path)?,
        None => Vec::new(),
    };
    if record {
        config.history.enabled = true;
    }

    let client = HttpSandboxClient::new(config.api.clone())?;
    let controller = PreviewController::new(
        config,
        Arc::new(client),
        Arc::new(StdoutEventSink::new(json_output)),
    );

    info!("Starting preview of {} ({} files)", dir.display(), files.len());
    let started = controller.start(files, conversation).await?;

    // An immediate answer has no stream to follow; keep serving until Ctrl-C.
    if started.sandbox_id.is_some() {
        if let Some(url) = &started.url {
            info!("Preview available at {}", url);
        }
        report_interrupt(tokio::signal::ctrl_c().await);
    } else {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                report_interrupt(signal);
            }
            session = controller.wait() => info!("Sandbox stream ended in phase {}", session.phase),
        }
    }

    let before_stop = controller.session().await;
    controller.stop().await;

    if before_stop.phase == Phase::Error {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Log why the foreground wait ended early. Returns false when the signal
/// handler itself could not be installed.
fn report_interrupt(signal: std::io::Result<()>) -> bool {
    match signal {
        Ok(()) => {
            info!("Interrupted, stopping preview");
            true
        }
        Err(e) => {
            error!("Cannot listen for Ctrl-C, stopping preview: {}", e);
            false
        }
    }
}
