//! Python language support

use tree_sitter::Node;

use crate::core::normalize::{node_text, Classified, NodeKind};
use crate::languages::{children_text, LanguageSupport};

/// Python language support implementation
pub struct PythonLanguage;

impl PythonLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for PythonLanguage {
    fn language_id(&self) -> &str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".py", ".pyw", ".pyi"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    /// `pkg/util.py` -> `pkg.util`, `pkg/__init__.py` -> `pkg`
    fn module_name(&self, path: &str, _root: Node, _source: &str) -> String {
        let without_ext = match path.rfind('.') {
            Some(idx) if !path[idx..].contains('/') => &path[..idx],
            _ => path,
        };
        let dotted = without_ext.trim_start_matches("./").replace(&['/', '\\'][..], ".");
        match dotted.strip_suffix(".__init__") {
            Some(pkg) => pkg.to_string(),
            None if dotted == "__init__" => String::new(),
            None => dotted,
        }
    }

    fn classify<'tree>(&self, node: Node<'tree>, source: &str) -> Option<Classified<'tree>> {
        match node.kind() {
            "function_definition" => {
                let name = node.child_by_field_name("name")?;
                Some(Classified::new(NodeKind::Function, node_text(source, name)))
            }
            "class_definition" => {
                let name = node.child_by_field_name("name")?;
                let bases = node
                    .child_by_field_name("superclasses")
                    .map(|args| children_text(args, source, &["identifier", "attribute"]))
                    .unwrap_or_default();
                Some(
                    Classified::new(NodeKind::Class, node_text(source, name))
                        .with_bases(bases)
                        .with_body(node.child_by_field_name("body")),
                )
            }
            "dotted_name" | "aliased_import" | "wildcard_import" => classify_import(node, source),
            "assignment" if is_declaration_scope(node) => {
                let left = node.child_by_field_name("left")?;
                if left.kind() != "identifier" {
                    return None;
                }
                Some(Classified::new(NodeKind::Variable, node_text(source, left)))
            }
            "call" => {
                let function = node.child_by_field_name("function")?;
                Some(Classified::new(NodeKind::Call, node_text(source, function)))
            }
            _ => None,
        }
    }
}

/// Import names appear as children of `import_statement` and
/// `import_from_statement`; the module part of a from-import is not an import
/// of its own.
fn classify_import<'tree>(node: Node<'tree>, source: &str) -> Option<Classified<'tree>> {
    let parent = node.parent()?;
    match parent.kind() {
        "import_statement" => {
            let (name, alias) = import_binding(node, source);
            // a plain `import a.b` binds the head `a`, which is left to the graph
            let alias = (node.kind() == "aliased_import").then_some(alias);
            Some(Classified::new(NodeKind::Import, name).with_alias(alias))
        }
        "import_from_statement" => {
            let module = parent.child_by_field_name("module_name")?;
            if module == node {
                return None;
            }
            let module_text = node_text(source, module);
            let join = |item: &str| {
                if module_text.ends_with('.') {
                    format!("{}{}", module_text, item)
                } else {
                    format!("{}.{}", module_text, item)
                }
            };

            if node.kind() == "wildcard_import" {
                return Some(Classified::new(NodeKind::Import, join("*")));
            }
            let (item, alias) = import_binding(node, source);
            Some(Classified::new(NodeKind::Import, join(&item)).with_alias(Some(alias)))
        }
        _ => None,
    }
}

/// Imported name and the local name it is bound to
fn import_binding(node: Node, source: &str) -> (String, String) {
    if node.kind() == "aliased_import" {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(source, n))
            .unwrap_or_default();
        let alias = node
            .child_by_field_name("alias")
            .map(|n| node_text(source, n))
            .unwrap_or_else(|| name.clone());
        (name, alias)
    } else {
        let name = node_text(source, node);
        (name.clone(), name)
    }
}

/// Assignments declare variables at module level and in class bodies only
fn is_declaration_scope(assignment: Node) -> bool {
    let Some(statement) = assignment.parent() else {
        return false;
    };
    if statement.kind() != "expression_statement" {
        return false;
    }
    match statement.parent() {
        Some(scope) if scope.kind() == "module" => true,
        Some(scope) if scope.kind() == "block" => scope
            .parent()
            .map(|owner| owner.kind() == "class_definition")
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::NormalizedNode;

    fn parse(source: &str, path: &str) -> crate::core::normalize::NormalizedTree {
        PythonLanguage::new().parse(source, path).unwrap()
    }

    fn find<'a>(root: &'a NormalizedNode, kind: NodeKind, name: &str) -> Option<&'a NormalizedNode> {
        root.descendants()
            .into_iter()
            .find(|n| n.kind == kind && n.name == name)
    }

    #[test]
    fn test_module_name_from_path() {
        let lang = PythonLanguage::new();
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&lang.grammar()).unwrap();
        let ts = parser.parse("", None).unwrap();
        let node = ts.root_node();
        assert_eq!(lang.module_name("a.py", node, ""), "a");
        assert_eq!(lang.module_name("pkg/util.py", node, ""), "pkg.util");
        assert_eq!(lang.module_name("pkg/__init__.py", node, ""), "pkg");
    }

    #[test]
    fn test_function_with_call() {
        let tree = parse("def f():\n    return g()\n", "a.py");
        assert_eq!(tree.module_name, "a");

        let f = find(&tree.root, NodeKind::Function, "f").unwrap();
        assert_eq!(f.span.start_line, 1);
        assert!(f.snippet.starts_with("def f():"));
        assert!(f.snippet.contains("return g()"));
        assert!(find(f, NodeKind::Call, "g").is_some());
    }

    #[test]
    fn test_class_bases_methods_and_attributes() {
        let source = r#"
class Repo(Base, mixins.Audit):
    table = "users"

    def save(self, item):
        self.validate(item)
        local = 1
"#;
        let tree = parse(source, "repo.py");
        let repo = find(&tree.root, NodeKind::Class, "Repo").unwrap();
        assert_eq!(repo.bases, vec!["Base".to_string(), "mixins.Audit".to_string()]);
        assert!(find(repo, NodeKind::Variable, "table").is_some());
        assert!(find(repo, NodeKind::Function, "save").is_some());
        assert!(find(repo, NodeKind::Call, "self.validate").is_some());
        // locals inside functions are not declarations
        assert!(find(repo, NodeKind::Variable, "local").is_none());
    }

    #[test]
    fn test_imports() {
        let source = "import os.path\nimport numpy as np\nfrom b import g, h as k\nfrom . import sibling\nfrom m import *\n";
        let tree = parse(source, "pkg/a.py");
        let imports: Vec<_> = tree
            .root
            .children
            .iter()
            .filter(|n| n.kind == NodeKind::Import)
            .map(|n| (n.name.as_str(), n.alias.as_deref()))
            .collect();
        assert_eq!(
            imports,
            vec![
                ("os.path", None),
                ("numpy", Some("np")),
                ("b.g", Some("g")),
                ("b.h", Some("k")),
                (".sibling", Some("sibling")),
                ("m.*", None),
            ]
        );
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let source = "import b\n\nclass A(b.B):\n    def run(self):\n        return b.g()\n";
        let first = parse(source, "a.py");
        let second = parse(source, "a.py");
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
