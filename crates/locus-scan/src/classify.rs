//! Content classification: is this file text worth indexing?

use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::Path;

use locus_core::IngestConfig;
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Extensions that are never source: media, archives, compiled artifacts,
/// fonts, and generated bundles.
const DENIED_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "icns", "webp", "tiff", "psd", "svg",
    // audio / video
    "mp3", "mp4", "wav", "ogg", "flac", "avi", "mov", "mkv", "webm",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war", "ear",
    // compiled
    "exe", "dll", "so", "dylib", "a", "lib", "o", "obj", "class", "pyc", "pyo", "wasm", "rlib",
    "bin", "dat",
    // documents and fonts
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "ttf", "otf", "woff", "woff2", "eot",
    // data dumps and generated files
    "lock", "map", "min", "csv", "tsv", "log", "db", "sqlite", "parquet",
];

/// Generated files that are noise even though they are text.
const DENIED_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "composer.lock",
    "go.sum",
];

/// Why a file was excluded. Skips are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Null bytes or too many control characters.
    Binary,
    /// Known non-source extension or generated file.
    DeniedExtension,
    /// Larger than the configured ceiling.
    Oversized,
    /// Zero bytes.
    Empty,
    /// Could not be read.
    Unreadable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Binary => "binary content",
            SkipReason::DeniedExtension => "non-source file type",
            SkipReason::Oversized => "file too large",
            SkipReason::Empty => "empty file",
            SkipReason::Unreadable => "unreadable file",
        };
        f.write_str(text)
    }
}

/// Classification verdict for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether the file should be indexed.
    pub include: bool,
    /// Detected language, when included and known.
    pub language: Option<Language>,
    /// Why the file was excluded.
    pub skip_reason: Option<SkipReason>,
}

impl Classification {
    fn include(language: Language) -> Self {
        Self {
            include: true,
            language: (language != Language::Unknown).then_some(language),
            skip_reason: None,
        }
    }

    /// An exclusion verdict.
    pub fn skip(reason: SkipReason) -> Self {
        Self {
            include: false,
            language: None,
            skip_reason: Some(reason),
        }
    }
}

/// Deterministic, side-effect-free file classifier.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use locus_core::IngestConfig;
/// use locus_scan::{Classifier, Language, SkipReason};
///
/// let classifier = Classifier::new(&IngestConfig::default());
///
/// let verdict = classifier.classify(Path::new("src/auth.rs"), b"fn login() {}", 13);
/// assert!(verdict.include);
/// assert_eq!(verdict.language, Some(Language::Rust));
///
/// let verdict = classifier.classify(Path::new("logo.png"), b"\x89PNG", 4);
/// assert_eq!(verdict.skip_reason, Some(SkipReason::DeniedExtension));
/// ```
#[derive(Debug, Clone)]
pub struct Classifier {
    max_file_bytes: u64,
    sample_bytes: usize,
    max_non_text_ratio: f64,
    denied_extensions: HashSet<String>,
}

impl Classifier {
    /// Build a classifier from ingestion limits.
    pub fn new(config: &IngestConfig) -> Self {
        let mut denied_extensions: HashSet<String> =
            DENIED_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        for ext in &config.skip_extensions {
            denied_extensions.insert(ext.trim_start_matches('.').to_ascii_lowercase());
        }
        Self {
            max_file_bytes: config.max_file_bytes,
            sample_bytes: config.sample_bytes,
            max_non_text_ratio: config.max_non_text_ratio,
            denied_extensions,
        }
    }

    /// Bytes to read for [`classify`](Self::classify).
    pub fn sample_bytes(&self) -> usize {
        self.sample_bytes
    }

    /// Classify a file from its path, a leading byte sample, and its size.
    pub fn classify(&self, path: &Path, sample: &[u8], file_size: u64) -> Classification {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if DENIED_FILE_NAMES.contains(&file_name) || file_name.ends_with(".min.js") {
            return Classification::skip(SkipReason::DeniedExtension);
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.denied_extensions.contains(&ext.to_ascii_lowercase()) {
                return Classification::skip(SkipReason::DeniedExtension);
            }
        }
        if file_size > self.max_file_bytes {
            return Classification::skip(SkipReason::Oversized);
        }
        if file_size == 0 || sample.is_empty() {
            return Classification::skip(SkipReason::Empty);
        }
        let window = &sample[..sample.len().min(self.sample_bytes)];
        if looks_binary(window, self.max_non_text_ratio) {
            return Classification::skip(SkipReason::Binary);
        }
        Classification::include(Language::detect(path))
    }

    /// Read the sample and size of a file on disk, then classify it.
    ///
    /// Unreadable files are skipped, never an error.
    pub fn classify_file(&self, path: &Path, relative: &Path) -> Classification {
        match read_sample(path, self.sample_bytes) {
            Ok((sample, size)) => self.classify(relative, &sample, size),
            Err(e) => {
                tracing::debug!(path = %relative.display(), error = %e, "unreadable file");
                Classification::skip(SkipReason::Unreadable)
            }
        }
    }
}

/// Read up to `limit` leading bytes of a file, plus its total size.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be opened or read.
pub fn read_sample(path: &Path, limit: usize) -> std::io::Result<(Vec<u8>, u64)> {
    let file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let mut sample = Vec::with_capacity(limit.min(size as usize));
    file.take(limit as u64).read_to_end(&mut sample)?;
    Ok((sample, size))
}

/// Null byte anywhere in the window, or control characters above `max_ratio`.
fn looks_binary(window: &[u8], max_ratio: f64) -> bool {
    if window.contains(&0) {
        return true;
    }
    let non_text = window
        .iter()
        .filter(|&&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b)) || b == 0x7f)
        .count();
    (non_text as f64 / window.len() as f64) > max_ratio
}
