//! `livepreview history`

use chrono::{DateTime, Local, Utc};
use livepreview_core::{PreviewConfig, Result, SessionHistory};
use std::process::ExitCode;

fn open(config: &PreviewConfig) -> Result<SessionHistory> {
    SessionHistory::open(&config.history.resolved_path())
}

fn format_time(micros: u64) -> String {
    match DateTime::<Utc>::from_timestamp_micros(micros as i64) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

pub async fn list(config: &PreviewConfig, json_output: bool) -> Result<ExitCode> {
    let transcripts = open(config)?.list().await?;

    if json_output {
        println!("{}", serde_json::to_string(&transcripts)?);
        return Ok(ExitCode::SUCCESS);
    }

    if transcripts.is_empty() {
        println!("No saved sessions");
    }
    for info in transcripts {
        println!(
            "{}  {}  {:<8} {:>4} entries {:>3} errors  {}",
            info.id,
            format_time(info.started_at),
            info.final_phase,
            info.entry_count,
            info.error_count,
            info.url.as_deref().unwrap_or("-")
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn show(config: &PreviewConfig, id: &str, json_output: bool) -> Result<ExitCode> {
    let transcript = open(config)?.load(id).await?;

    if json_output {
        println!("{}", serde_json::to_string(&transcript)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Session {} ({})", transcript.id, transcript.final_phase);
    if let Some(url) = &transcript.url {
        println!("URL: {url}");
    }
    println!(
        "Started {}, ran {} ms",
        format_time(transcript.started_at),
        transcript.duration_ms()
    );
    for entry in &transcript.entries {
        println!("[{:<8}] {:<5} {}", entry.origin, entry.level, entry.message);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn delete(config: &PreviewConfig, id: &str) -> Result<ExitCode> {
    open(config)?.delete(id).await?;
    println!("Deleted session {id}");
    Ok(ExitCode::SUCCESS)
}
