//! Go language support

use tree_sitter::Node;

use crate::core::normalize::{node_text, Classified, NodeKind};
use crate::languages::LanguageSupport;

/// Go language support implementation
pub struct GoLanguage;

impl GoLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for GoLanguage {
    fn language_id(&self) -> &str {
        "go"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".go"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    /// Directory plus package clause. The package alone is not unique: every
    /// `cmd/*/main.go` declares `package main`.
    fn module_name(&self, path: &str, root: Node, source: &str) -> String {
        let package = package_name(root, source);
        let dir: Vec<&str> = path
            .rsplit_once('/')
            .map(|(dir, _)| dir.split('/').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        match (dir.last(), package.is_empty()) {
            (None, _) => package,
            (Some(_), true) => dir.join("."),
            (Some(last), false) if *last == package => dir.join("."),
            (Some(_), false) => format!("{}.{}", dir.join("."), package),
        }
    }

    fn classify<'tree>(&self, node: Node<'tree>, source: &str) -> Option<Classified<'tree>> {
        match node.kind() {
            "import_spec" => {
                let path = node_text(source, node.child_by_field_name("path")?)
                    .trim_matches('"')
                    .to_string();
                let alias = node
                    .child_by_field_name("name")
                    .map(|n| node_text(source, n))
                    .or_else(|| path.rsplit('/').next().map(str::to_string));
                Some(Classified::new(NodeKind::Import, path).with_alias(alias))
            }
            "function_declaration" => {
                let name = node.child_by_field_name("name")?;
                Some(Classified::new(NodeKind::Function, node_text(source, name)))
            }
            "method_declaration" => {
                let name = node_text(source, node.child_by_field_name("name")?);
                // methods are namespaced by their receiver type
                let name = match node
                    .child_by_field_name("receiver")
                    .and_then(|r| receiver_type(r, source))
                {
                    Some(receiver) => format!("{}.{}", receiver, name),
                    None => name,
                };
                Some(Classified::new(NodeKind::Function, name))
            }
            "type_spec" => {
                let name = node.child_by_field_name("name")?;
                let ty = node.child_by_field_name("type");
                let bases = ty
                    .filter(|t| t.kind() == "struct_type")
                    .map(|t| embedded_fields(t, source))
                    .unwrap_or_default();
                Some(
                    Classified::new(NodeKind::Class, node_text(source, name))
                        .with_bases(bases)
                        .with_body(ty),
                )
            }
            "var_spec" | "const_spec" if is_package_level(node) => {
                let name = node.child_by_field_name("name")?;
                Some(Classified::new(NodeKind::Variable, node_text(source, name)))
            }
            "call_expression" => {
                let function = node.child_by_field_name("function")?;
                Some(Classified::new(NodeKind::Call, node_text(source, function)))
            }
            "type_identifier" | "qualified_type" => {
                Some(Classified::new(NodeKind::Reference, node_text(source, node)))
            }
            _ => None,
        }
    }
}

/// `(s *Server)` -> `Server`
fn receiver_type(receiver: Node, source: &str) -> Option<String> {
    for i in 0..receiver.child_count() {
        let Some(param) = receiver.child(i) else { continue };
        if param.kind() != "parameter_declaration" {
            continue;
        }
        let mut ty = param.child_by_field_name("type")?;
        while ty.kind() == "pointer_type" {
            ty = (0..ty.child_count())
                .filter_map(|j| ty.child(j))
                .find(|c| c.kind() != "*")?;
        }
        if ty.kind() == "generic_type" {
            ty = ty.child_by_field_name("type")?;
        }
        return Some(node_text(source, ty));
    }
    None
}

/// Anonymous struct fields, the Go flavor of inheritance
fn embedded_fields(struct_type: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..struct_type.child_count() {
        let Some(list) = struct_type.child(i) else { continue };
        if list.kind() != "field_declaration_list" {
            continue;
        }
        for j in 0..list.child_count() {
            let Some(field) = list.child(j) else { continue };
            if field.kind() == "field_declaration" && field.child_by_field_name("name").is_none() {
                if let Some(ty) = field.child_by_field_name("type") {
                    out.push(node_text(source, ty).trim_start_matches('*').to_string());
                }
            }
        }
    }
    out
}

fn package_name(root: Node, source: &str) -> String {
    for i in 0..root.child_count() {
        let Some(clause) = root.child(i).filter(|c| c.kind() == "package_clause") else {
            continue;
        };
        for j in 0..clause.child_count() {
            if let Some(ident) = clause.child(j).filter(|c| c.kind() == "package_identifier") {
                return node_text(source, ident);
            }
        }
    }
    String::new()
}

fn is_package_level(spec: Node) -> bool {
    let mut current = spec.parent();
    while let Some(node) = current {
        match node.kind() {
            "var_declaration" | "const_declaration" => {
                return node
                    .parent()
                    .map(|p| p.kind() == "source_file")
                    .unwrap_or(false);
            }
            "var_spec_list" | "const_spec_list" => current = node.parent(),
            _ => return false,
        }
    }
    false
}
