//! Language-agnostic normalized syntax tree
//!
//! Every language adapter produces a [`NormalizedTree`]. The walker in this
//! module drives a tree-sitter tree through the adapter's [`classify`] table
//! and keeps only the nodes the adapter recognizes; everything else is
//! flattened into the nearest recognized ancestor.
//!
//! [`classify`]: crate::languages::LanguageSupport::classify

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tree_sitter::{Node, Tree};

use crate::languages::LanguageSupport;

/// Fixed node-kind enumeration shared by all adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Class,
    Function,
    Variable,
    Import,
    Call,
    Reference,
    Unknown,
}

impl NodeKind {
    /// Whether nodes of this kind own nested normalized nodes
    pub fn is_container(self) -> bool {
        matches!(
            self,
            NodeKind::Module | NodeKind::Class | NodeKind::Function | NodeKind::Variable | NodeKind::Call
        )
    }
}

/// Byte and line span of a node in its source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    /// 1-based
    pub start_line: u32,
    /// 1-based, inclusive
    pub end_line: u32,
}

impl Span {
    pub fn of(node: Node) -> Self {
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
        }
    }

    /// Span covering the whole text
    pub fn whole(text: &str) -> Self {
        let lines = text.lines().count().max(1) as u32;
        Self {
            start_byte: 0,
            end_byte: text.len(),
            start_line: 1,
            end_line: lines,
        }
    }
}

/// One node of the normalized tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedNode {
    pub kind: NodeKind,
    pub name: String,
    pub span: Span,
    pub snippet: String,
    /// Base types named in a class header
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    /// Local binding introduced by an import. `None` on a non-wildcard import
    /// binds the first segment of the imported name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NormalizedNode>,
}

impl NormalizedNode {
    pub fn new(kind: NodeKind, name: impl Into<String>, span: Span, snippet: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            span,
            snippet: snippet.into(),
            bases: Vec::new(),
            alias: None,
            children: Vec::new(),
        }
    }

    /// Depth-first iterator over this node and all descendants
    pub fn descendants(&self) -> Vec<&NormalizedNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

/// Normalized tree for a single source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTree {
    pub path: String,
    pub language: String,
    /// Module (or package) the file belongs to
    pub module_name: String,
    /// Root node, always of kind `module`
    pub root: NormalizedNode,
    /// Bare names inside a class body may refer to its members
    #[serde(default)]
    pub bare_members: bool,
}

impl NormalizedTree {
    /// Tree for a file the adapter could not model: a module root holding one
    /// `unknown` leaf that wraps the raw text.
    pub fn degraded(path: &str, language: &str, module_name: &str, text: &str) -> Self {
        let span = Span::whole(text);
        let mut root = NormalizedNode::new(NodeKind::Module, module_name, span, text);
        root.children
            .push(NormalizedNode::new(NodeKind::Unknown, path, span, text));
        Self {
            path: path.to_string(),
            language: language.to_string(),
            module_name: module_name.to_string(),
            root,
            bare_members: false,
        }
    }

    /// SHA-256 over the canonical JSON encoding of the tree
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.root.descendants().iter().filter(|n| n.kind == kind).count()
    }
}

/// What an adapter reports for a native grammar node it recognizes
#[derive(Debug, Clone)]
pub struct Classified<'tree> {
    pub kind: NodeKind,
    pub name: String,
    pub bases: Vec<String>,
    pub alias: Option<String>,
    /// Only descend into this node instead of the whole classified node
    pub body: Option<Node<'tree>>,
}

impl<'tree> Classified<'tree> {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            bases: Vec::new(),
            alias: None,
            body: None,
        }
    }

    pub fn with_bases(mut self, bases: Vec<String>) -> Self {
        self.bases = bases;
        self
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    pub fn with_body(mut self, body: Option<Node<'tree>>) -> Self {
        self.body = body;
        self
    }
}

/// Normalize a tree-sitter tree through the adapter's classification table
pub fn normalize<L>(lang: &L, source: &str, path: &str, tree: &Tree) -> NormalizedTree
where
    L: LanguageSupport + ?Sized,
{
    let root_node = tree.root_node();
    let module_name = lang.module_name(path, root_node, source);

    let mut root = NormalizedNode::new(
        NodeKind::Module,
        module_name.clone(),
        Span::whole(source),
        source,
    );
    for i in 0..root_node.child_count() {
        if let Some(child) = root_node.child(i) {
            walk(lang, source, child, &mut root.children);
        }
    }

    NormalizedTree {
        path: path.to_string(),
        language: lang.language_id().to_string(),
        module_name,
        root,
        bare_members: lang.bare_names_reach_members(),
    }
}

fn walk<L>(lang: &L, source: &str, node: Node, out: &mut Vec<NormalizedNode>)
where
    L: LanguageSupport + ?Sized,
{
    match lang.classify(node, source) {
        Some(classified) => {
            let span = Span::of(node);
            let mut normalized = NormalizedNode::new(
                classified.kind,
                classified.name,
                span,
                &source[node.byte_range()],
            );
            normalized.bases = classified.bases;
            normalized.alias = classified.alias;

            if classified.kind.is_container() {
                let scope = classified.body.unwrap_or(node);
                for i in 0..scope.child_count() {
                    if let Some(child) = scope.child(i) {
                        walk(lang, source, child, &mut normalized.children);
                    }
                }
            }
            out.push(normalized);
        }
        None => {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    walk(lang, source, child, out);
                }
            }
        }
    }
}

/// Text of a node
pub fn node_text(source: &str, node: Node) -> String {
    source[node.byte_range()].to_string()
}
