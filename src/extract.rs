//! Text artifact extraction from uploaded archives and plain files.
//!
//! Only files whose extension is on [`TEXT_EXTENSIONS`] become artifacts.
//! Decoding is total: bytes that are not valid UTF-8 are replaced with
//! U+FFFD. A single unreadable archive entry is recorded as an inline error
//! message under its filename so the rest of the batch survives; only a
//! failure to open the upload itself is returned as an [`ExtractError`].

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::models::ArtifactBatch;

/// Recognized text-artifact extensions (lower-case, without the dot).
pub const TEXT_EXTENSIONS: &[&str] = &[
    "py", "js", "html", "css", "java", "c", "cpp", "h", "cs", "php", "rb", "go", "rs", "ts",
    "jsx", "tsx", "md", "txt", "json", "xml", "yaml", "yml", "toml", "ini", "cfg", "conf", "sh",
    "bat", "ps1",
];

/// Prefix of the content stored for an entry that could not be read.
pub const ENTRY_ERROR_PREFIX: &str = "Error extracting file: ";

/// Maximum decompressed bytes read from one entry unless configured otherwise.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;

/// Failure to open an upload. Fatal for that upload only.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Returns the lower-cased extension of `name` (text after the final dot of
/// the last path component), if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Whether `name` carries an allow-listed text extension.
pub fn is_text_file(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether an upload at `path` should be treated as a zip archive.
pub fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Display name of an upload: the basename of its path.
pub fn batch_id_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Extracts the text artifacts of one upload.
///
/// `batch_id` only labels log output; artifacts are keyed by filename.
pub fn extract(
    batch_id: &str,
    source_path: &Path,
    is_archive: bool,
    max_entry_bytes: u64,
) -> Result<ArtifactBatch, ExtractError> {
    let batch = if is_archive {
        extract_archive(source_path, max_entry_bytes)?
    } else {
        extract_plain(source_path, max_entry_bytes)?
    };
    tracing::debug!(batch = batch_id, files = batch.len(), "extracted upload");
    Ok(batch)
}

/// Decodes bytes as UTF-8, replacing invalid sequences.
pub fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_plain(path: &Path, max_bytes: u64) -> Result<ArtifactBatch, ExtractError> {
    let mut batch = ArtifactBatch::new();
    let name = batch_id_for(path);
    if !is_text_file(&name) {
        return Ok(batch);
    }

    let file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = match read_bounded(file, max_bytes) {
        Ok(bytes) => decode_lossy(&bytes),
        Err(reason) => format!("{}{}", ENTRY_ERROR_PREFIX, reason),
    };
    batch.insert(name, content);
    Ok(batch)
}

fn extract_archive(path: &Path, max_bytes: u64) -> Result<ArtifactBatch, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| ExtractError::Archive {
        path: path.to_path_buf(),
        source,
    })?;

    let names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .filter(|n| is_text_file(n))
        .map(|s| s.to_string())
        .collect();

    let mut batch = ArtifactBatch::new();
    for name in names {
        let content = match read_entry(&mut archive, &name, max_bytes) {
            Ok(bytes) => decode_lossy(&bytes),
            Err(reason) => {
                tracing::warn!(entry = %name, error = %reason, "failed to extract archive entry");
                format!("{}{}", ENTRY_ERROR_PREFIX, reason)
            }
        };
        batch.insert(name, content);
    }
    Ok(batch)
}

fn read_entry(
    archive: &mut zip::ZipArchive<File>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    if entry.is_dir() {
        return Err("entry is a directory".to_string());
    }
    read_bounded(entry, max_bytes)
}

fn read_bounded(reader: impl Read, max_bytes: u64) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    reader
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 > max_bytes {
        return Err(format!("file exceeds size limit ({} bytes)", max_bytes));
    }
    Ok(out)
}
