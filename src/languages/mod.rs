//! Language adapters
//!
//! This module provides the trait every language adapter implements and the
//! registry the pipeline selects adapters from. Adapters are chosen by the
//! project's declared language, never by sniffing file contents.

pub mod go;
pub mod java;
pub mod python;

use std::sync::Arc;

use thiserror::Error;
use tree_sitter::Node;

use crate::core::normalize::{self, Classified, NormalizedTree};

/// Adapter-local failure. The pipeline degrades the file instead of aborting.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unsupported construct in {path} at line {line}: {reason}")]
    UnsupportedConstruct {
        path: String,
        line: u32,
        reason: String,
    },

    #[error("grammar for {language} could not be loaded: {reason}")]
    Grammar { language: String, reason: String },
}

/// Trait for language adapters
pub trait LanguageSupport: Send + Sync {
    /// Get the language identifier (e.g., "python", "java", "go")
    fn language_id(&self) -> &str;

    /// Get supported file extensions (e.g., [".java"], [".go"])
    fn file_extensions(&self) -> &[&str];

    /// Get the tree-sitter grammar
    fn grammar(&self) -> tree_sitter::Language;

    /// Module or package a file belongs to
    fn module_name(&self, path: &str, root: Node, source: &str) -> String;

    /// Whether a bare name inside a class body can mean a member of that
    /// class. Python and Go need an explicit receiver.
    fn bare_names_reach_members(&self) -> bool {
        false
    }

    /// Map a native grammar node onto the normalized schema, or `None` to
    /// flatten it into its parent
    fn classify<'tree>(&self, node: Node<'tree>, source: &str) -> Option<Classified<'tree>>;

    /// Parse source text into a normalized tree
    fn parse(&self, source: &str, path: &str) -> Result<NormalizedTree, AdapterError> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.grammar())
            .map_err(|e| AdapterError::Grammar {
                language: self.language_id().to_string(),
                reason: e.to_string(),
            })?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| AdapterError::UnsupportedConstruct {
                path: path.to_string(),
                line: 1,
                reason: "parser produced no tree".to_string(),
            })?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(1);
            return Err(AdapterError::UnsupportedConstruct {
                path: path.to_string(),
                line,
                reason: "syntax error".to_string(),
            });
        }

        Ok(normalize::normalize(self, source, path, &tree))
    }

    /// Module name of a file that may not parse cleanly
    fn module_name_of(&self, source: &str, path: &str) -> String {
        let mut parser = tree_sitter::Parser::new();
        if parser.set_language(&self.grammar()).is_err() {
            return String::new();
        }
        match parser.parse(source, None) {
            Some(tree) => self.module_name(path, tree.root_node(), source),
            None => String::new(),
        }
    }
}

/// Line of the first ERROR or MISSING node, 1-based
fn first_error_line(node: Node) -> Option<u32> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row as u32 + 1);
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.has_error() || child.is_missing() {
                if let Some(line) = first_error_line(child) {
                    return Some(line);
                }
            }
        }
    }
    None
}

/// Registry for managing language adapters
pub struct LanguageRegistry {
    languages: Vec<Arc<dyn LanguageSupport>>,
}

impl LanguageRegistry {
    /// Create a new registry with the built-in adapters
    pub fn new() -> Self {
        let mut registry = Self {
            languages: Vec::new(),
        };

        registry.register(Arc::new(python::PythonLanguage::new()));
        registry.register(Arc::new(java::JavaLanguage::new()));
        registry.register(Arc::new(go::GoLanguage::new()));

        registry
    }

    /// Register a language adapter
    pub fn register(&mut self, language: Arc<dyn LanguageSupport>) {
        self.languages.push(language);
    }

    /// Get an adapter by language ID (case-insensitive)
    pub fn get(&self, language_id: &str) -> Option<&Arc<dyn LanguageSupport>> {
        self.languages
            .iter()
            .find(|l| l.language_id().eq_ignore_ascii_case(language_id))
    }

    /// Get an adapter by file extension
    pub fn get_by_extension(&self, extension: &str) -> Option<&Arc<dyn LanguageSupport>> {
        let ext = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };

        self.languages
            .iter()
            .find(|l| l.file_extensions().contains(&ext.as_str()))
    }

    /// List all registered adapters
    pub fn list_languages(&self) -> &[Arc<dyn LanguageSupport>] {
        &self.languages
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect the text of every direct child of the given kinds
pub(crate) fn children_text(node: Node, source: &str, kinds: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if kinds.contains(&child.kind()) {
                out.push(normalize::node_text(source, child));
            }
        }
    }
    out
}
