//! Java language support

use tree_sitter::Node;

use crate::core::normalize::{node_text, Classified, NodeKind};
use crate::languages::LanguageSupport;

/// Java language support implementation
pub struct JavaLanguage;

impl JavaLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for JavaLanguage {
    fn language_id(&self) -> &str {
        "java"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".java"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }

    /// The declared package, or the default (empty) package
    fn module_name(&self, _path: &str, root: Node, source: &str) -> String {
        for i in 0..root.child_count() {
            if let Some(child) = root.child(i) {
                if child.kind() == "package_declaration" {
                    return first_child_text(child, source, &["scoped_identifier", "identifier"])
                        .unwrap_or_default();
                }
            }
        }
        String::new()
    }

    fn bare_names_reach_members(&self) -> bool {
        true
    }

    fn classify<'tree>(&self, node: Node<'tree>, source: &str) -> Option<Classified<'tree>> {
        match node.kind() {
            "import_declaration" => {
                let path = first_child_text(node, source, &["scoped_identifier", "identifier"])?;
                let wildcard = (0..node.child_count())
                    .filter_map(|i| node.child(i))
                    .any(|c| c.kind() == "asterisk");
                if wildcard {
                    Some(Classified::new(NodeKind::Import, format!("{}.*", path)))
                } else {
                    let alias = path.rsplit('.').next().map(str::to_string);
                    Some(Classified::new(NodeKind::Import, path).with_alias(alias))
                }
            }
            "class_declaration" | "interface_declaration" | "enum_declaration"
            | "record_declaration" => {
                let name = node.child_by_field_name("name")?;
                Some(
                    Classified::new(NodeKind::Class, node_text(source, name))
                        .with_bases(base_types(node, source))
                        .with_body(node.child_by_field_name("body")),
                )
            }
            "method_declaration" | "constructor_declaration" => {
                let name = node.child_by_field_name("name")?;
                Some(Classified::new(NodeKind::Function, node_text(source, name)))
            }
            "field_declaration" => {
                let declarator = node.child_by_field_name("declarator")?;
                let name = declarator.child_by_field_name("name")?;
                Some(Classified::new(NodeKind::Variable, node_text(source, name)))
            }
            "method_invocation" => {
                let name = node_text(source, node.child_by_field_name("name")?);
                let callee = match node.child_by_field_name("object") {
                    Some(object)
                        if matches!(object.kind(), "identifier" | "this" | "field_access") =>
                    {
                        format!("{}.{}", node_text(source, object), name)
                    }
                    _ => name,
                };
                Some(Classified::new(NodeKind::Call, callee))
            }
            "object_creation_expression" => {
                let ty = node.child_by_field_name("type")?;
                let name = leading_type_identifier(ty, source).unwrap_or_else(|| node_text(source, ty));
                Some(
                    Classified::new(NodeKind::Call, name)
                        .with_body(node.child_by_field_name("arguments")),
                )
            }
            "type_identifier" => Some(Classified::new(NodeKind::Reference, node_text(source, node))),
            _ => None,
        }
    }
}

fn first_child_text(node: Node, source: &str, kinds: &[&str]) -> Option<String> {
    (0..node.child_count())
        .filter_map(|i| node.child(i))
        .find(|c| kinds.contains(&c.kind()))
        .map(|c| node_text(source, c))
}

/// Superclass, implemented and extended interfaces
fn base_types(decl: Node, source: &str) -> Vec<String> {
    let mut bases = Vec::new();
    for i in 0..decl.child_count() {
        let Some(child) = decl.child(i) else { continue };
        if matches!(
            child.kind(),
            "superclass" | "super_interfaces" | "extends_interfaces"
        ) {
            collect_type_names(child, source, &mut bases);
        }
    }
    bases
}

/// Type names in a header clause, skipping generic arguments
fn collect_type_names(node: Node, source: &str, out: &mut Vec<String>) {
    for i in 0..node.child_count() {
        let Some(child) = node.child(i) else { continue };
        match child.kind() {
            "type_identifier" => out.push(node_text(source, child)),
            "scoped_type_identifier" => out.push(node_text(source, child)),
            "generic_type" => {
                if let Some(name) = leading_type_identifier(child, source) {
                    out.push(name);
                }
            }
            "type_arguments" => {}
            _ => collect_type_names(child, source, out),
        }
    }
}

fn leading_type_identifier(node: Node, source: &str) -> Option<String> {
    if matches!(node.kind(), "type_identifier" | "scoped_type_identifier") {
        return Some(node_text(source, node));
    }
    (0..node.child_count())
        .filter_map(|i| node.child(i))
        .find(|c| matches!(c.kind(), "type_identifier" | "scoped_type_identifier"))
        .map(|c| node_text(source, c))
}
