//! Project file packager
//!
//! Turns a project's file list into one binary payload for the session
//! creation request:
//!
//! 1. drop files the [`FileFilter`] marks as unwanted
//! 2. write the remainder plus a metadata entry into a zip archive
//!    (entries stored, not deflated)
//! 3. gzip the whole archive
//!
//! Compressing the concatenated archive once beats compressing many small
//! files individually, and a receiver only needs to gunzip then unzip.

pub mod filter;

pub use filter::{DefaultFileFilter, FileFilter};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{PreviewError, Result};

/// Reserved archive key for the metadata record. Delimiter-wrapped so it
/// cannot be mistaken for a project file.
pub const METADATA_ENTRY: &str = "__livepreview_metadata__.json";

pub const ARCHIVE_FORMAT: &str = "zip";
pub const COMPRESSION_SCHEME: &str = "gzip";

/// One project file as held by the editor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectFile {
    pub path: String,
    pub content: String,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A prior turn of the builder conversation, forwarded as context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileTreeSummary {
    pub total_files: usize,
    pub total_bytes: u64,
    /// Every directory that contains a packaged file, sorted
    pub directories: Vec<String>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackagingDiagnostics {
    pub original_file_count: usize,
    pub packaged_file_count: usize,
    pub excluded_file_count: usize,
    pub packaged_at: DateTime<Utc>,
    pub archive_format: String,
    pub compression: String,
}

/// Content of the reserved metadata entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    pub file_tree: FileTreeSummary,
    #[serde(default)]
    pub conversation: Vec<ConversationMessage>,
    pub diagnostics: PackagingDiagnostics,
}

/// Output of [`Packager::pack`]
#[derive(Debug, Clone)]
pub struct PackagedPayload {
    /// gzip(zip(files + metadata))
    pub bytes: Vec<u8>,
    pub file_count: usize,
    pub archive_size: usize,
    pub compressed_size: usize,
    pub metadata: PayloadMetadata,
}

impl PackagedPayload {
    /// compressed / archive, 0.0 for an empty archive
    pub fn compression_ratio(&self) -> f64 {
        if self.archive_size == 0 {
            0.0
        } else {
            self.compressed_size as f64 / self.archive_size as f64
        }
    }
}

/// A payload opened back up
#[derive(Debug, Clone)]
pub struct UnpackedPayload {
    pub files: BTreeMap<String, String>,
    pub metadata: PayloadMetadata,
}

/// Files that survived filtering, keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub files: BTreeMap<String, String>,
    pub excluded: usize,
}

/// Normalize to a forward-slash relative path. Returns `None` for empty
/// paths and paths escaping the project root.
pub fn normalize_path(raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[derive(Clone)]
pub struct Packager {
    filter: Arc<dyn FileFilter>,
    compression_level: u32,
}

impl Packager {
    pub fn new(filter: Arc<dyn FileFilter>, compression_level: u32) -> Self {
        Self {
            filter,
            compression_level: compression_level.min(9),
        }
    }

    pub fn filter(&self) -> &dyn FileFilter {
        self.filter.as_ref()
    }

    /// Apply normalization and the unwanted-file policy
    pub fn select(&self, files: &[ProjectFile]) -> Selection {
        select_files(self.filter.as_ref(), files)
    }

    /// Package `files` with conversation context. Fails with
    /// [`PreviewError::EmptyFileSet`] when nothing survives filtering.
    pub fn pack(
        &self,
        files: &[ProjectFile],
        conversation: &[ConversationMessage],
    ) -> Result<PackagedPayload> {
        let selection = self.select(files);
        if selection.files.is_empty() {
            return Err(PreviewError::EmptyFileSet);
        }

        let metadata = PayloadMetadata {
            file_tree: summarize(&selection.files),
            conversation: conversation.to_vec(),
            diagnostics: PackagingDiagnostics {
                original_file_count: files.len(),
                packaged_file_count: selection.files.len(),
                excluded_file_count: selection.excluded,
                packaged_at: Utc::now(),
                archive_format: ARCHIVE_FORMAT.to_string(),
                compression: COMPRESSION_SCHEME.to_string(),
            },
        };

        let archive = write_archive(&selection.files, Some(&metadata), CompressionMethod::Stored)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.compression_level));
        encoder
            .write_all(&archive)
            .map_err(|e| PreviewError::Packaging(format!("gzip failed: {e}")))?;
        let bytes = encoder
            .finish()
            .map_err(|e| PreviewError::Packaging(format!("gzip failed: {e}")))?;

        debug!(
            "Packaged {} files ({} excluded): archive {} bytes, compressed {} bytes",
            selection.files.len(),
            selection.excluded,
            archive.len(),
            bytes.len()
        );

        Ok(PackagedPayload {
            file_count: selection.files.len(),
            archive_size: archive.len(),
            compressed_size: bytes.len(),
            bytes,
            metadata,
        })
    }

    /// [`Packager::pack`] on the blocking pool
    pub async fn pack_async(
        &self,
        files: Vec<ProjectFile>,
        conversation: Vec<ConversationMessage>,
    ) -> Result<PackagedPayload> {
        let packager = self.clone();
        tokio::task::spawn_blocking(move || packager.pack(&files, &conversation))
            .await
            .map_err(|e| PreviewError::Packaging(format!("packaging task failed: {e}")))?
    }
}

impl Default for Packager {
    fn default() -> Self {
        Self::new(
            Arc::new(DefaultFileFilter::new()),
            crate::config::defaults::DEFAULT_COMPRESSION_LEVEL,
        )
    }
}

pub(crate) fn select_files(filter: &dyn FileFilter, files: &[ProjectFile]) -> Selection {
    let mut selection = Selection::default();
    for file in files {
        let Some(path) = normalize_path(&file.path) else {
            warn!("Dropping file with unusable path: {:?}", file.path);
            selection.excluded += 1;
            continue;
        };
        if path == METADATA_ENTRY {
            warn!("Dropping project file that collides with the metadata entry");
            selection.excluded += 1;
            continue;
        }
        if filter.is_unwanted(&path) {
            selection.excluded += 1;
            continue;
        }
        // Later duplicates win.
        if selection.files.insert(path, file.content.clone()).is_some() {
            selection.excluded += 1;
        }
    }
    selection
}

fn summarize(files: &BTreeMap<String, String>) -> FileTreeSummary {
    let mut directories = BTreeSet::new();
    for path in files.keys() {
        let mut current = path.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            directories.insert(parent.to_string());
            current = parent;
        }
    }
    FileTreeSummary {
        total_files: files.len(),
        total_bytes: files.values().map(|c| c.len() as u64).sum(),
        directories: directories.into_iter().collect(),
        paths: files.keys().cloned().collect(),
    }
}

/// Write files (and optionally the metadata entry) into an in-memory zip
pub(crate) fn write_archive(
    files: &BTreeMap<String, String>,
    metadata: Option<&PayloadMetadata>,
    method: CompressionMethod,
) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);

    for (path, content) in files {
        zip.start_file(path.as_str(), options)?;
        zip.write_all(content.as_bytes())?;
    }

    if let Some(metadata) = metadata {
        zip.start_file(METADATA_ENTRY, options)?;
        zip.write_all(&serde_json::to_vec(metadata)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Reverse of [`Packager::pack`]: gunzip, unzip, split off the metadata
pub fn unpack(bytes: &[u8]) -> Result<UnpackedPayload> {
    let mut archive = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut archive)
        .map_err(|e| PreviewError::Packaging(format!("gunzip failed: {e}")))?;

    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let mut files = BTreeMap::new();
    let mut metadata = None;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_string();
        let mut content = String::new();
        entry.read_to_string(&mut content)?;

        if name == METADATA_ENTRY {
            metadata = Some(serde_json::from_str(&content)?);
        } else {
            files.insert(name, content);
        }
    }

    let metadata = metadata
        .ok_or_else(|| PreviewError::Packaging("payload has no metadata entry".to_string()))?;
    Ok(UnpackedPayload { files, metadata })
}
