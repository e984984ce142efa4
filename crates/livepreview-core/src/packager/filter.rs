//! Unwanted-file policy
//!
//! Decides which project files cannot affect a running preview: binary
//! media, generated/build output, test directories, lockfiles.

/// Policy deciding which files stay out of a payload
pub trait FileFilter: Send + Sync {
    /// `path` is already normalized (forward slashes, relative)
    fn is_unwanted(&self, path: &str) -> bool;
}

impl<F> FileFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_unwanted(&self, path: &str) -> bool {
        self(path)
    }
}

const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "webp", "ico", "bmp", "tiff", "avif", "heic", "psd",
    // audio / video
    "mp3", "wav", "ogg", "flac", "m4a", "mp4", "mov", "webm", "avi", "mkv",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // documents / archives / binaries
    "pdf", "zip", "gz", "tgz", "tar", "rar", "7z", "exe", "dll", "so", "dylib", "wasm",
];

const GENERATED_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    ".next",
    "out",
    ".turbo",
    ".vercel",
    ".cache",
    "coverage",
    ".git",
    ".svelte-kit",
];

const TEST_DIRS: &[&str] = &["__tests__", "test", "tests", "e2e", "cypress"];

const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "bun.lock",
];

const JUNK_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Built-in policy, extendable with extra directories and extensions
#[derive(Debug, Clone, Default)]
pub struct DefaultFileFilter {
    extra_dirs: Vec<String>,
    extra_extensions: Vec<String>,
}

impl DefaultFileFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    pub fn with_excluded_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_extensions.extend(
            extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase()),
        );
        self
    }

    fn is_excluded_dir(&self, segment: &str) -> bool {
        GENERATED_DIRS.contains(&segment)
            || TEST_DIRS.contains(&segment)
            || self.extra_dirs.iter().any(|d| d == segment)
    }

    fn is_excluded_extension(&self, file_name: &str) -> bool {
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        BINARY_EXTENSIONS.contains(&ext.as_str()) || self.extra_extensions.contains(&ext)
    }
}

impl FileFilter for DefaultFileFilter {
    fn is_unwanted(&self, path: &str) -> bool {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(file_name) = segments.pop() else {
            return true;
        };

        if segments.iter().any(|dir| self.is_excluded_dir(dir)) {
            return true;
        }
        if LOCKFILES.contains(&file_name) || JUNK_FILES.contains(&file_name) {
            return true;
        }
        self.is_excluded_extension(file_name)
    }
}
