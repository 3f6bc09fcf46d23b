//! File collection and parallel parsing

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::config::ParserConfig;
use crate::core::error::{CodeShiftError, Result};
use crate::core::normalize::NormalizedTree;
use crate::languages::{LanguageRegistry, LanguageSupport};

/// A staged source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated
    pub path: String,
    pub language: String,
    pub text: String,
    pub content_hash: String,
}

/// A source file together with its normalized tree
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub source: SourceFile,
    pub tree: NormalizedTree,
    /// Why the adapter could not model the file
    pub degraded: Option<String>,
}

/// Code parser that runs the project's language adapter over its files
pub struct CodeParser {
    registry: Arc<LanguageRegistry>,
    limits: ParserConfig,
}

impl CodeParser {
    /// Create a new parser with the given language registry
    pub fn new(registry: Arc<LanguageRegistry>, limits: ParserConfig) -> Self {
        Self { registry, limits }
    }

    fn adapter(&self, language_id: &str) -> Result<&Arc<dyn LanguageSupport>> {
        self.registry.get(language_id).ok_or_else(|| {
            CodeShiftError::InvalidRequest(format!("unsupported source language '{}'", language_id))
        })
    }

    /// Collect the files of the declared language under `root`, sorted by
    /// path. Hidden entries and platform metadata are skipped, as are files
    /// over the size limit; at most `max_files` are taken.
    pub fn collect_files(&self, root: &Path, language_id: &str) -> Result<Vec<SourceFile>> {
        let lang = self.adapter(language_id)?;
        if !root.is_dir() {
            return Err(CodeShiftError::ParseError(format!(
                "project root {:?} is not a directory",
                root
            )));
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored(e))
        {
            let entry = entry.map_err(|e| CodeShiftError::ParseError(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches_language = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| lang.file_extensions().contains(&format!(".{}", ext).as_str()))
                .unwrap_or(false);
            if !matches_language {
                continue;
            }

            let size = entry
                .metadata()
                .map_err(|e| CodeShiftError::ParseError(e.to_string()))?
                .len();
            if size > self.limits.max_file_size_bytes {
                warn!(path = ?entry.path(), size, "Skipping file over size limit");
                continue;
            }
            paths.push(entry.into_path());
        }

        paths.sort();
        if paths.len() > self.limits.max_files {
            warn!(
                found = paths.len(),
                limit = self.limits.max_files,
                "File limit reached, remaining files are ignored"
            );
            paths.truncate(self.limits.max_files);
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            // Read file as bytes first to handle non-UTF8 encodings
            let bytes = fs::read(&path)
                .map_err(|e| CodeShiftError::ParseError(format!("failed to read {:?}: {}", path, e)))?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            files.push(SourceFile {
                path: relative_path(root, &path),
                language: lang.language_id().to_string(),
                content_hash: compute_hash(&text),
                text,
            });
        }

        debug!(count = files.len(), root = ?root, "Collected source files");
        Ok(files)
    }

    /// Parse every file in parallel. A file the adapter rejects is degraded
    /// to a single `unknown` leaf instead of failing the batch; output order
    /// follows input order.
    pub fn parse_files(&self, files: Vec<SourceFile>) -> Result<Vec<ParsedFile>> {
        let mut adapters = Vec::with_capacity(files.len());
        for file in &files {
            adapters.push(Arc::clone(self.adapter(&file.language)?));
        }

        Ok(files
            .into_par_iter()
            .zip(adapters.into_par_iter())
            .map(|(file, lang)| parse_one(lang.as_ref(), file))
            .collect())
    }
}

fn parse_one(lang: &dyn LanguageSupport, file: SourceFile) -> ParsedFile {
    match lang.parse(&file.text, &file.path) {
        Ok(tree) => {
            debug!(path = %file.path, "Parsed file");
            ParsedFile {
                source: file,
                tree,
                degraded: None,
            }
        }
        Err(e) => {
            warn!(path = %file.path, error = %e, "Degrading file to an unknown node");
            let module_name = lang.module_name_of(&file.text, &file.path);
            let tree = NormalizedTree::degraded(&file.path, lang.language_id(), &module_name, &file.text);
            ParsedFile {
                source: file,
                tree,
                degraded: Some(e.to_string()),
            }
        }
    }
}

/// Hidden entries and archive/OS metadata
fn is_ignored(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.') || s == "__MACOSX" || s.starts_with("._"))
        .unwrap_or(false)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Compute SHA-256 hash of content
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
