//! Fixture document discovery and loading (spec §4.8 Preparation/Discovery).
//!
//! Grounded on the teacher's `loader.rs` directory walk (`find_specs`/`collect_specs_recursive`,
//! skip-dotfiles, sort-for-determinism idiom), retargeted at Markdown fixture documents. The
//! teacher's binary-path resolution (`resolve_binary_path`) has no counterpart here; this crate
//! has no subprocess-binary concept. Its replacement, `resolve_external_path`, uses the same
//! relative-to-directory resolution style for `ExternalFile` fixture/expectation paths.

use crate::markdown::{self, ParseError};
use crate::model::Document;
use std::path::{Path, PathBuf};

const SKIP_DIR_NAMES: &[&str] = &["vendor", "node_modules"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, #[source] source: ParseError },
}

/// A fixture document is a candidate when its name ends with `.snap.md`, or ends with `.md` and
/// contains `test` or `spec` (case-insensitive) in its filename.
pub fn is_fixture_document(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_lowercase();
    if lower.ends_with(".snap.md") {
        return true;
    }
    lower.ends_with(".md") && (lower.contains("test") || lower.contains("spec"))
}

/// Finds all candidate fixture documents under `path` (or returns `path` itself if it is a file).
pub fn find_documents(path: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut docs = Vec::new();
    collect_recursive(path, &mut docs)?;
    docs.sort();
    Ok(docs)
}

fn collect_recursive(dir: &Path, docs: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') || SKIP_DIR_NAMES.contains(&name.as_ref()) {
            continue;
        }

        if path.is_dir() {
            collect_recursive(&path, docs)?;
        } else if is_fixture_document(&path) {
            docs.push(path);
        }
    }
    Ok(())
}

/// Reads and parses one fixture document from disk.
pub fn load_document(path: &Path) -> Result<Document, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    let source_file = path.to_string_lossy().replace('\\', "/");
    markdown::parse(&source_file, &text).map_err(|source| LoadError::Parse { path: path.to_path_buf(), source })
}

/// Resolves an `ExternalFile` reference relative to the directory containing the document that
/// referenced it.
pub fn resolve_external_path(document_path: &Path, reference: &str) -> PathBuf {
    let reference_path = Path::new(reference);
    if reference_path.is_absolute() {
        return reference_path.to_path_buf();
    }
    document_path.parent().unwrap_or_else(|| Path::new(".")).join(reference_path)
}
