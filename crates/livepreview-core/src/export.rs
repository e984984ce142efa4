//! Download archive
//!
//! Packages a project for the user rather than for the sandbox: the same
//! unwanted-file policy as the payload packager, but a plain zip with no
//! outer compression pass and no metadata entry.

use std::path::Path;
use tracing::info;
use zip::CompressionMethod;

use crate::error::{PreviewError, Result};
use crate::packager::{select_files, write_archive, FileFilter, ProjectFile};

/// A finished download archive
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub bytes: Vec<u8>,
    pub file_count: usize,
    pub excluded_count: usize,
}

/// Build the download archive in memory
pub fn export_archive(filter: &dyn FileFilter, files: &[ProjectFile]) -> Result<ExportArchive> {
    let selection = select_files(filter, files);
    if selection.files.is_empty() {
        return Err(PreviewError::EmptyFileSet);
    }

    let bytes = write_archive(&selection.files, None, CompressionMethod::Stored)?;
    Ok(ExportArchive {
        bytes,
        file_count: selection.files.len(),
        excluded_count: selection.excluded,
    })
}

/// Build the download archive and write it to `path`
pub fn write_export(
    filter: &dyn FileFilter,
    files: &[ProjectFile],
    path: &Path,
) -> Result<ExportArchive> {
    let archive = export_archive(filter, files)?;
    std::fs::write(path, &archive.bytes)?;
    info!(
        "Exported {} files ({} bytes) to {}",
        archive.file_count,
        archive.bytes.len(),
        path.display()
    );
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{DefaultFileFilter, METADATA_ENTRY};
    use std::io::{Cursor, Read};
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn files() -> Vec<ProjectFile> {
        vec![
            ProjectFile::new("index.html", "<html></html>"),
            ProjectFile::new("src/main.ts", "console.log('hi')"),
            ProjectFile::new("dist/main.js", "bundle"),
            ProjectFile::new("yarn.lock", ""),
        ]
    }

    #[test]
    fn test_export_is_plain_zip() {
        let archive = export_archive(&DefaultFileFilter::new(), &files()).unwrap();
        assert_eq!(archive.file_count, 2);
        assert_eq!(archive.excluded_count, 2);
        // Local file header magic; no gzip wrapper
        assert_eq!(&archive.bytes[..4], b"PK\x03\x04");

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 2);
        assert!(zip.by_name(METADATA_ENTRY).is_err());

        let mut content = String::new();
        zip.by_name("src/main.ts")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "console.log('hi')");
    }

    #[test]
    fn test_export_empty_selection() {
        let only_junk = vec![ProjectFile::new("node_modules/x/index.js", "")];
        assert!(matches!(
            export_archive(&DefaultFileFilter::new(), &only_junk),
            Err(PreviewError::EmptyFileSet)
        ));
    }

    #[test]
    fn test_write_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.zip");
        let archive = write_export(&DefaultFileFilter::new(), &files(), &path).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), archive.bytes.len());
    }
}
