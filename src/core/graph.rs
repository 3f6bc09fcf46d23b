//! Graph builder for constructing code graphs
//!
//! Building runs in two passes over the normalized trees of a whole project.
//! The first pass emits file, module and declaration nodes with their
//! `contains` edges and fills the [`SymbolTable`]; the second resolves
//! imports, calls, references and base classes against the complete table.
//! Names that cannot be resolved become `unknown` placeholder nodes scoped to
//! the referencing file, so every edge has both endpoints.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::core::normalize::{NodeKind, NormalizedNode, Span};
use crate::core::parser::ParsedFile;
use crate::core::symbols::{Scope, SymbolTable};
use crate::storage::models::{EdgeData, EdgeKind, FileData, GraphNodeKind, NodeData};
use crate::storage::{Database, StoreResult};

/// Counters reported by a parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub files: usize,
    pub nodes: usize,
    pub edges: usize,
    pub degraded_files: usize,
    pub unresolved_references: usize,
}

/// Node arena plus edge list for one project
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectGraph {
    pub nodes: Vec<NodeData>,
    pub edges: Vec<EdgeData>,
    #[serde(skip)]
    pub files: Vec<FileData>,
    pub stats: ParseStats,
}

struct FileScope {
    path: String,
    module: String,
    file_idx: usize,
    bare_members: bool,
}

/// A name use waiting for the second pass
struct PendingUse {
    owner: usize,
    scope: usize,
    class: Option<usize>,
    name: String,
    kind: EdgeKind,
    span: Span,
}

struct PendingImport {
    scope: usize,
    target: String,
    alias: Option<String>,
    span: Span,
}

/// Builder for constructing code graphs
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeData>,
    edges: Vec<EdgeData>,
    symbols: SymbolTable,
    scopes: Vec<FileScope>,
    uses: Vec<PendingUse>,
    imports: Vec<PendingImport>,
    placeholders: HashMap<(usize, String), usize>,
    unresolved: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of a whole project. Files are processed in path order,
    /// so the same input always yields the same node and edge sequence.
    pub fn build(files: &[ParsedFile]) -> ProjectGraph {
        let mut ordered: Vec<&ParsedFile> = files.iter().collect();
        ordered.sort_by(|a, b| a.source.path.cmp(&b.source.path));

        let mut builder = Self::new();
        for file in &ordered {
            builder.declare_file(file);
        }
        builder.resolve();

        let file_data: Vec<FileData> = ordered
            .iter()
            .map(|f| FileData {
                path: f.source.path.clone(),
                language: f.source.language.clone(),
                content_hash: f.source.content_hash.clone(),
                degraded: f.degraded.clone(),
            })
            .collect();

        let stats = ParseStats {
            files: file_data.len(),
            nodes: builder.nodes.len(),
            edges: builder.edges.len(),
            degraded_files: file_data.iter().filter(|f| f.degraded.is_some()).count(),
            unresolved_references: builder.unresolved,
        };
        debug!(?stats, "Built project graph");

        ProjectGraph {
            nodes: builder.nodes,
            edges: builder.edges,
            files: file_data,
            stats,
        }
    }

    // ==================== First Pass ====================

    fn declare_file(&mut self, file: &ParsedFile) {
        let path = file.source.path.clone();
        let module = file.tree.module_name.clone();

        let module_idx = if module.is_empty() {
            None
        } else {
            Some(self.module_node(&module))
        };

        let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let file_idx = self.push_node(NodeData {
            kind: GraphNodeKind::File,
            name: file_name,
            qualified_name: path.clone(),
            file_path: Some(path.clone()),
            span: Span::whole(&file.source.text),
            snippet: file.source.text.clone(),
        });

        let scope = self.scopes.len();
        self.scopes.push(FileScope {
            path,
            module: module.clone(),
            file_idx,
            bare_members: file.tree.bare_members,
        });
        if let Some(module_idx) = module_idx {
            self.push_edge(module_idx, file_idx, EdgeKind::Contains, scope, Span::default());
        }

        for child in &file.tree.root.children {
            self.declare(scope, child, file_idx, &module, None, file_idx);
        }
    }

    fn module_node(&mut self, module: &str) -> usize {
        if let Some(idx) = self.symbols.module(module) {
            return idx;
        }
        let idx = self.push_node(NodeData {
            kind: GraphNodeKind::Module,
            name: module.to_string(),
            qualified_name: module.to_string(),
            file_path: None,
            span: Span::default(),
            snippet: String::new(),
        });
        self.symbols.add_module(module, idx);
        idx
    }

    /// Emit `node` under `parent`. `owner` is the declaration that name uses
    /// inside `node` are attributed to.
    fn declare(
        &mut self,
        scope: usize,
        node: &NormalizedNode,
        parent: usize,
        prefix: &str,
        class: Option<usize>,
        owner: usize,
    ) {
        match node.kind {
            NodeKind::Class | NodeKind::Function | NodeKind::Variable => {
                let kind = match node.kind {
                    NodeKind::Class => GraphNodeKind::Class,
                    NodeKind::Function => GraphNodeKind::Function,
                    _ => GraphNodeKind::Variable,
                };
                let qualified = self.unique_name(join(prefix, &node.name));
                let path = self.scopes[scope].path.clone();
                let idx = self.push_node(NodeData {
                    kind,
                    name: node.name.clone(),
                    qualified_name: qualified.clone(),
                    file_path: Some(path.clone()),
                    span: node.span,
                    snippet: node.snippet.clone(),
                });
                self.push_edge(parent, idx, EdgeKind::Contains, scope, node.span);
                self.symbols
                    .add_declaration(&qualified, last_segment(&node.name), &path, class, idx);

                for base in &node.bases {
                    self.uses.push(PendingUse {
                        owner: idx,
                        scope,
                        class: None,
                        name: base.clone(),
                        kind: EdgeKind::Inherits,
                        span: node.span,
                    });
                }

                let inner_class = if kind == GraphNodeKind::Class { Some(idx) } else { class };
                for child in &node.children {
                    self.declare(scope, child, idx, &qualified, inner_class, idx);
                }
            }
            NodeKind::Import => {
                let path = self.scopes[scope].path.clone();
                let target = absolute_import(&self.scopes[scope], &node.name);
                let idx = self.push_node(NodeData {
                    kind: GraphNodeKind::Import,
                    name: node.name.clone(),
                    qualified_name: target.clone(),
                    file_path: Some(path),
                    span: node.span,
                    snippet: node.snippet.clone(),
                });
                self.push_edge(parent, idx, EdgeKind::Contains, scope, node.span);
                self.imports.push(PendingImport {
                    scope,
                    target,
                    alias: node.alias.clone(),
                    span: node.span,
                });
            }
            NodeKind::Call | NodeKind::Reference => {
                let kind = if node.kind == NodeKind::Call {
                    EdgeKind::Calls
                } else {
                    EdgeKind::References
                };
                self.uses.push(PendingUse {
                    owner,
                    scope,
                    class,
                    name: node.name.clone(),
                    kind,
                    span: node.span,
                });
                for child in &node.children {
                    self.declare(scope, child, parent, prefix, class, owner);
                }
            }
            NodeKind::Unknown => {
                let scope_ref = &self.scopes[scope];
                let name = scope_ref.path.rsplit('/').next().unwrap_or(&scope_ref.path).to_string();
                let data = NodeData {
                    kind: GraphNodeKind::Unknown,
                    name,
                    qualified_name: format!("{}::unparsed", scope_ref.path),
                    file_path: Some(scope_ref.path.clone()),
                    span: node.span,
                    snippet: node.snippet.clone(),
                };
                let idx = self.push_node(data);
                self.push_edge(parent, idx, EdgeKind::Contains, scope, node.span);
            }
            NodeKind::Module => {
                for child in &node.children {
                    self.declare(scope, child, parent, prefix, class, owner);
                }
            }
        }
    }

    fn unique_name(&self, qualified: String) -> String {
        if !self.symbols.contains_qualified(&qualified) {
            return qualified;
        }
        (2..)
            .map(|n| format!("{}#{}", qualified, n))
            .find(|candidate| !self.symbols.contains_qualified(candidate))
            .unwrap_or(qualified)
    }

    // ==================== Second Pass ====================

    fn resolve(&mut self) {
        // imports first: their bindings feed call resolution
        let imports = std::mem::take(&mut self.imports);
        for import in imports {
            let wanted = import.target.trim_end_matches(".*").to_string();
            let resolved = self
                .symbols
                .lookup_qualified(&wanted)
                .or_else(|| self.go_package(&wanted));

            let target = match resolved {
                Some(idx) => idx,
                None => self.placeholder(import.scope, &import.target),
            };
            let binding = match &import.alias {
                Some(alias) => {
                    let bound_to = match resolved {
                        Some(idx) => self.nodes[idx].qualified_name.clone(),
                        None => wanted.clone(),
                    };
                    Some((alias.clone(), bound_to))
                }
                None if !import.target.ends_with(".*") => {
                    // `import a.b` binds `a` itself
                    let head = wanted.split('.').next().unwrap_or(&wanted).to_string();
                    let bound_to = match self.symbols.lookup_qualified(&head) {
                        Some(idx) => self.nodes[idx].qualified_name.clone(),
                        None => head.clone(),
                    };
                    Some((head, bound_to))
                }
                None => None,
            };
            if let Some((alias, bound_to)) = binding {
                let path = self.scopes[import.scope].path.clone();
                self.symbols.add_binding(&path, &alias, &bound_to);
            }
            let file_idx = self.scopes[import.scope].file_idx;
            self.push_edge(file_idx, target, EdgeKind::Imports, import.scope, import.span);
        }

        let uses = std::mem::take(&mut self.uses);
        for pending in uses {
            let file_scope = &self.scopes[pending.scope];
            let scope = Scope {
                file_path: &file_scope.path,
                module: &file_scope.module,
                class: pending.class,
                bare_members: file_scope.bare_members,
            };
            let target = match self.symbols.resolve(scope, &pending.name) {
                Some(idx) => idx,
                None => self.placeholder(pending.scope, &pending.name),
            };
            self.push_edge(pending.owner, target, pending.kind, pending.scope, pending.span);
        }
    }

    /// Go imports name a path. The package module is keyed by its directory,
    /// so match the longest path suffix that is a known module.
    fn go_package(&self, import_path: &str) -> Option<usize> {
        let segments: Vec<&str> = import_path.split('/').collect();
        if segments.len() < 2 {
            return None;
        }
        (0..segments.len()).find_map(|start| self.symbols.module(&segments[start..].join(".")))
    }

    /// `unknown` node for a name that did not resolve, one per file and name
    fn placeholder(&mut self, scope: usize, name: &str) -> usize {
        self.unresolved += 1;
        let key = (scope, name.to_string());
        if let Some(&idx) = self.placeholders.get(&key) {
            return idx;
        }
        let path = self.scopes[scope].path.clone();
        let idx = self.push_node(NodeData {
            kind: GraphNodeKind::Unknown,
            name: name.to_string(),
            qualified_name: name.to_string(),
            file_path: Some(path),
            span: Span::default(),
            snippet: String::new(),
        });
        self.placeholders.insert(key, idx);
        idx
    }

    fn push_node(&mut self, node: NodeData) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn push_edge(&mut self, source: usize, target: usize, kind: EdgeKind, scope: usize, span: Span) {
        self.edges.push(EdgeData {
            source_idx: source,
            target_idx: target,
            kind,
            file_path: Some(self.scopes[scope].path.clone()),
            span,
        });
    }
}

/// Write a freshly built graph, replacing the project's previous one in a
/// single transaction
pub fn store_project_graph(db: &Database, project_id: i64, graph: &ProjectGraph) -> StoreResult<()> {
    let tx = db.begin_parse(project_id)?;
    tx.insert_files(&graph.files)?;
    let ids = tx.upsert_nodes(&graph.nodes)?;
    tx.upsert_edges(&ids, &graph.edges)?;
    tx.commit()?;
    debug!(
        project_id,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "Stored project graph"
    );
    Ok(())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Resolve leading-dot relative imports against the importing module
fn absolute_import(scope: &FileScope, name: &str) -> String {
    let dots = name.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return name.to_string();
    }
    let mut package: Vec<&str> = scope.module.split('.').filter(|s| !s.is_empty()).collect();
    let is_package_init = scope
        .path
        .rsplit('/')
        .next()
        .map(|f| f.starts_with("__init__."))
        .unwrap_or(false);
    let levels = if is_package_init { dots - 1 } else { dots };
    for _ in 0..levels {
        package.pop();
    }
    let rest = &name[dots..];
    if !rest.is_empty() {
        package.push(rest);
    }
    package.join(".")
}
