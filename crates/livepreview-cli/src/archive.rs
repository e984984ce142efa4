//! `livepreview pack` and `livepreview export`

use livepreview_core::export::write_export;
use livepreview_core::{unpack, DefaultFileFilter, Packager, PreviewConfig, Result};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use crate::project;

#[derive(Serialize)]
struct PackReport<'a> {
    output: String,
    file_count: usize,
    archive_bytes: usize,
    compressed_bytes: usize,
    compression_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    paths: Option<Vec<&'a str>>,
}

pub async fn pack(
    config: &PreviewConfig,
    dir: &Path,
    output: &Path,
    inspect: bool,
    json_output: bool,
) -> Result<ExitCode> {
    let files = project::load_project(dir)?;
    let packager = Packager::new(
        Arc::new(DefaultFileFilter::new()),
        config.packager.compression_level,
    );
    let payload = packager.pack_async(files, Vec::new()).await?;
    std::fs::write(output, &payload.bytes)?;

    let unpacked = if inspect {
        Some(unpack(&payload.bytes)?)
    } else {
        None
    };

    let report = PackReport {
        output: output.display().to_string(),
        file_count: payload.file_count,
        archive_bytes: payload.archive_size,
        compressed_bytes: payload.compressed_size,
        compression_ratio: payload.compression_ratio(),
        paths: unpacked
            .as_ref()
            .map(|u| u.files.keys().map(String::as_str).collect()),
    };

    if json_output {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "Packed {} files into {}: {} bytes archived, {} bytes compressed ({:.1}%)",
            report.file_count,
            report.output,
            report.archive_bytes,
            report.compressed_bytes,
            report.compression_ratio * 100.0
        );
        if let Some(paths) = &report.paths {
            for path in paths {
                println!("  {path}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn export(dir: &Path, output: &Path, json_output: bool) -> Result<ExitCode> {
    let files = project::load_project(dir)?;
    let archive = write_export(&DefaultFileFilter::new(), &files, output)?;

    if json_output {
        let report = serde_json::json!({
            "output": output.display().to_string(),
            "file_count": archive.file_count,
            "excluded_count": archive.excluded_count,
            "bytes": archive.bytes.len(),
        });
        println!("{report}");
    } else {
        println!(
            "Exported {} files to {} ({} excluded)",
            archive.file_count,
            output.display(),
            archive.excluded_count
        );
    }
    Ok(ExitCode::SUCCESS)
}
