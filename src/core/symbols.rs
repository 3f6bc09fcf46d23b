//! Project-wide symbol table used for cross-file resolution

use std::collections::{BTreeMap, HashMap};

/// A declaration visible by simple name
#[derive(Debug, Clone)]
struct SimpleEntry {
    qualified_name: String,
    file_path: String,
    idx: usize,
}

/// Where a name is being looked up from
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub file_path: &'a str,
    pub module: &'a str,
    /// Innermost enclosing class
    pub class: Option<usize>,
    /// Bare names inside a class may name its members (Java), rather than
    /// only `self.`-qualified ones (Python, Go)
    pub bare_members: bool,
}

/// Symbol table filled in the first graph pass and read in the second
#[derive(Debug, Default)]
pub struct SymbolTable {
    qualified: HashMap<String, usize>,
    modules: HashMap<String, usize>,
    simple: HashMap<String, Vec<SimpleEntry>>,
    members: HashMap<usize, HashMap<String, usize>>,
    /// Per-file local binding -> imported qualified name
    bindings: HashMap<String, BTreeMap<String, String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_qualified(&self, qualified_name: &str) -> bool {
        self.qualified.contains_key(qualified_name)
    }

    pub fn add_module(&mut self, module: &str, idx: usize) {
        self.modules.insert(module.to_string(), idx);
    }

    pub fn module(&self, module: &str) -> Option<usize> {
        self.modules.get(module).copied()
    }

    /// Register a declaration; `simple_name` is the last segment of its name
    pub fn add_declaration(
        &mut self,
        qualified_name: &str,
        simple_name: &str,
        file_path: &str,
        class: Option<usize>,
        idx: usize,
    ) {
        self.qualified.insert(qualified_name.to_string(), idx);
        self.simple
            .entry(simple_name.to_string())
            .or_default()
            .push(SimpleEntry {
                qualified_name: qualified_name.to_string(),
                file_path: file_path.to_string(),
                idx,
            });
        if let Some(class) = class {
            self.members
                .entry(class)
                .or_default()
                .entry(simple_name.to_string())
                .or_insert(idx);
        }
    }

    pub fn add_binding(&mut self, file_path: &str, alias: &str, target: &str) {
        self.bindings
            .entry(file_path.to_string())
            .or_default()
            .insert(alias.to_string(), target.to_string());
    }

    /// Declaration or module with exactly this qualified name
    pub fn lookup_qualified(&self, name: &str) -> Option<usize> {
        self.qualified
            .get(name)
            .or_else(|| self.modules.get(name))
            .copied()
    }

    /// Resolve a name used in `scope`. Lookup order: member of the enclosing
    /// class (`self.`/`this.`, and bare names where the language allows it),
    /// import binding prefix, exact qualified name, same-module name,
    /// project-wide simple name. Dotted names only fall back to the simple
    /// name index when their head resolves inside the project; `os.getcwd`
    /// must not land on some project function called `getcwd`.
    pub fn resolve(&self, scope: Scope<'_>, name: &str) -> Option<usize> {
        let stripped = name
            .strip_prefix("self.")
            .or_else(|| name.strip_prefix("this."));

        if let Some(class) = scope.class {
            let member = match stripped {
                Some(rest) => Some(rest.split('.').next().unwrap_or(rest)),
                None if scope.bare_members && !name.contains('.') => Some(name),
                None => None,
            };
            if let Some(idx) = member.and_then(|m| self.members.get(&class)?.get(m)) {
                return Some(*idx);
            }
        }
        if stripped.is_some() {
            return self.by_simple_name(scope, last_segment(name));
        }

        if let Some(bound) = self.bound_prefix(scope.file_path, name) {
            // a name routed through an import either resolves there or nowhere
            return bound;
        }

        if let Some(idx) = self.lookup_qualified(name) {
            return Some(idx);
        }
        if !scope.module.is_empty() {
            if let Some(idx) = self.lookup_qualified(&format!("{}.{}", scope.module, name)) {
                return Some(idx);
            }
        }
        match name.split_once('.') {
            None => self.by_simple_name(scope, name),
            Some((head, _)) => {
                self.resolve(scope, head)?;
                self.by_simple_name(scope, last_segment(name))
            }
        }
    }

    /// `Some(result)` when the leading part of `name` is an import binding
    fn bound_prefix(&self, file_path: &str, name: &str) -> Option<Option<usize>> {
        let bindings = self.bindings.get(file_path)?;
        if let Some(target) = bindings.get(name) {
            return Some(self.lookup_qualified(target));
        }
        let mut split = name.len();
        while let Some(dot) = name[..split].rfind('.') {
            let (head, rest) = (&name[..dot], &name[dot + 1..]);
            if let Some(target) = bindings.get(head) {
                return Some(self.lookup_qualified(&format!("{}.{}", target, rest)));
            }
            split = dot;
        }
        None
    }

    /// Same file first, then the lowest qualified name
    fn by_simple_name(&self, scope: Scope<'_>, simple: &str) -> Option<usize> {
        let candidates = self.simple.get(simple)?;
        candidates
            .iter()
            .filter(|c| c.file_path == scope.file_path)
            .min_by(|a, b| a.qualified_name.cmp(&b.qualified_name))
            .or_else(|| {
                candidates
                    .iter()
                    .min_by(|a, b| a.qualified_name.cmp(&b.qualified_name))
            })
            .map(|c| c.idx)
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(file_path: &'a str, module: &'a str, class: Option<usize>) -> Scope<'a> {
        Scope {
            file_path,
            module,
            class,
            bare_members: true,
        }
    }

    fn table() -> SymbolTable {
        let mut t = SymbolTable::new();
        t.add_module("a", 0);
        t.add_module("b", 1);
        t.add_declaration("a.f", "f", "a.py", None, 10);
        t.add_declaration("b.g", "g", "b.py", None, 11);
        t.add_declaration("b.Repo", "Repo", "b.py", None, 12);
        t.add_declaration("b.Repo.save", "save", "b.py", Some(12), 13);
        t.add_declaration("z.g", "g", "z.py", None, 14);
        t
    }

    #[test]
    fn test_resolution_order() {
        let mut t = table();
        let a = scope("a.py", "a", None);

        // simple name, lowest qualified name wins across files
        assert_eq!(t.resolve(a, "g"), Some(11));
        // same file wins over lower qualified names
        assert_eq!(t.resolve(scope("z.py", "z", None), "g"), Some(14));
        // exact qualified name
        assert_eq!(t.resolve(a, "z.g"), Some(14));
        // same module
        assert_eq!(t.resolve(a, "f"), Some(10));

        t.add_binding("a.py", "mod", "b");
        t.add_binding("a.py", "np", "numpy");
        assert_eq!(t.resolve(a, "mod.g"), Some(11));
        assert_eq!(t.resolve(a, "mod"), Some(1));
        // bound to something outside the project
        assert_eq!(t.resolve(a, "np.array"), None);
        assert_eq!(t.resolve(a, "print"), None);
    }

    #[test]
    fn test_member_resolution() {
        let t = table();
        let in_repo = scope("b.py", "b", Some(12));
        assert_eq!(t.resolve(in_repo, "self.save"), Some(13));
        assert_eq!(t.resolve(in_repo, "this.save"), Some(13));
        assert_eq!(t.resolve(in_repo, "save"), Some(13));
        // outside the class, the simple-name index still finds it
        assert_eq!(t.resolve(scope("a.py", "a", None), "self.save"), Some(13));
    }

    #[test]
    fn test_bare_names_skip_members_when_disallowed() {
        let mut t = table();
        t.add_declaration("b.save", "save", "b.py", None, 15);
        let python = Scope {
            bare_members: false,
            ..scope("b.py", "b", Some(12))
        };
        assert_eq!(t.resolve(python, "save"), Some(15));
        assert_eq!(t.resolve(python, "self.save"), Some(13));
    }

    #[test]
    fn test_dotted_names_need_a_project_head() {
        let mut t = table();
        t.add_declaration("util.getcwd", "getcwd", "util.py", None, 16);
        let a = scope("a.py", "a", None);

        // `os` is nothing in the project
        assert_eq!(t.resolve(a, "os.getcwd"), None);
        // `Repo` is, so its members are looked up by simple name
        assert_eq!(t.resolve(a, "Repo.save"), Some(13));
        assert_eq!(t.resolve(a, "getcwd"), Some(16));
    }
}
