//! Dependency ordering of conversion units
//!
//! Units are files. `imports`, `calls` and `inherits` edges are lifted from
//! declarations to the files that own them; the resulting file graph is
//! condensed into strongly connected components and those are ordered
//! topologically, dependencies first, ties broken by path.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::storage::models::{EdgeKind, EdgeRecord, GraphNodeKind, NodeRecord};

/// A file to convert
#[derive(Debug, Clone)]
pub struct Unit {
    pub node_id: i64,
    pub path: String,
    pub source: String,
    pub degraded: bool,
}

/// Conversion plan over a graph snapshot
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Sorted by path
    pub units: Vec<Unit>,
    /// Direct dependencies of each unit
    pub deps: Vec<BTreeSet<usize>>,
    /// Conversion order, dependencies first
    pub order: Vec<usize>,
    /// Other members of the unit's cycle; empty outside cycles
    pub cycle_peers: Vec<Vec<usize>>,
}

impl Plan {
    pub fn build(nodes: &[NodeRecord], edges: &[EdgeRecord], degraded: &HashSet<String>) -> Self {
        let mut units: Vec<Unit> = nodes
            .iter()
            .filter(|n| n.kind == GraphNodeKind::File)
            .map(|n| Unit {
                node_id: n.id,
                path: n.qualified_name.clone(),
                source: n.snippet.clone(),
                degraded: degraded.contains(&n.qualified_name),
            })
            .collect();
        units.sort_by(|a, b| a.path.cmp(&b.path));

        let deps = lift_dependencies(&units, nodes, edges);
        let components = strongly_connected(&deps);
        let order = topological_order(&deps, &components);

        let mut cycle_peers = vec![Vec::new(); units.len()];
        for component in components.iter().filter(|c| c.len() > 1) {
            for &unit in component {
                cycle_peers[unit] = component.iter().copied().filter(|&u| u != unit).collect();
            }
        }

        Self {
            units,
            deps,
            order,
            cycle_peers,
        }
    }

    pub fn position_of(&self, path: &str) -> Option<usize> {
        self.units.binary_search_by(|u| u.path.as_str().cmp(path)).ok()
    }
}

fn lift_dependencies(units: &[Unit], nodes: &[NodeRecord], edges: &[EdgeRecord]) -> Vec<BTreeSet<usize>> {
    let unit_of_path: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(i, u)| (u.path.as_str(), i))
        .collect();
    let node_by_id: HashMap<i64, &NodeRecord> = nodes.iter().map(|n| (n.id, n)).collect();

    let mut module_files: HashMap<i64, Vec<usize>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.kind == EdgeKind::Contains) {
        let (Some(source), Some(target)) = (node_by_id.get(&edge.source_id), node_by_id.get(&edge.target_id))
        else {
            continue;
        };
        if source.kind == GraphNodeKind::Module && target.kind == GraphNodeKind::File {
            if let Some(&unit) = unit_of_path.get(target.qualified_name.as_str()) {
                module_files.entry(source.id).or_default().push(unit);
            }
        }
    }

    let owners = |node_id: i64| -> Vec<usize> {
        let Some(node) = node_by_id.get(&node_id) else {
            return Vec::new();
        };
        match node.kind {
            GraphNodeKind::Unknown | GraphNodeKind::Import => Vec::new(),
            GraphNodeKind::Module => module_files.get(&node.id).cloned().unwrap_or_default(),
            GraphNodeKind::File => unit_of_path
                .get(node.qualified_name.as_str())
                .map(|&u| vec![u])
                .unwrap_or_default(),
            _ => node
                .file_path
                .as_deref()
                .and_then(|p| unit_of_path.get(p))
                .map(|&u| vec![u])
                .unwrap_or_default(),
        }
    };

    let mut deps = vec![BTreeSet::new(); units.len()];
    for edge in edges {
        if !matches!(edge.kind, EdgeKind::Imports | EdgeKind::Calls | EdgeKind::Inherits) {
            continue;
        }
        for source in owners(edge.source_id) {
            for target in owners(edge.target_id) {
                if source != target {
                    deps[source].insert(target);
                }
            }
        }
    }
    deps
}

/// Tarjan's algorithm; members of each component come back sorted
fn strongly_connected(deps: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        deps: &'a [BTreeSet<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.next_index);
            self.lowlink[v] = self.next_index;
            self.next_index += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            let deps = self.deps;
            for &w in deps[v].iter() {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }
    }

    let n = deps.len();
    let mut tarjan = Tarjan {
        deps,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }
    tarjan.components
}

/// Kahn's algorithm over the condensation. Units are path-sorted, so a
/// component's smallest member index doubles as its tie-break key.
fn topological_order(deps: &[BTreeSet<usize>], components: &[Vec<usize>]) -> Vec<usize> {
    let mut component_of = vec![0; deps.len()];
    for (c, members) in components.iter().enumerate() {
        for &unit in members {
            component_of[unit] = c;
        }
    }

    let mut waiting_on: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    for (unit, targets) in deps.iter().enumerate() {
        for &target in targets {
            let (from, to) = (component_of[unit], component_of[target]);
            if from != to {
                waiting_on[from].insert(to);
                dependents[to].insert(from);
            }
        }
    }

    let key = |c: usize| components[c][0];
    let mut ready: BTreeSet<(usize, usize)> = (0..components.len())
        .filter(|&c| waiting_on[c].is_empty())
        .map(|c| (key(c), c))
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some((_, c)) = ready.pop_first() {
        order.extend(components[c].iter().copied());
        for &dependent in &dependents[c] {
            waiting_on[dependent].remove(&c);
            if waiting_on[dependent].is_empty() {
                ready.insert((key(dependent), dependent));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::Span;

    fn file(id: i64, path: &str) -> NodeRecord {
        NodeRecord {
            id,
            project_id: 1,
            kind: GraphNodeKind::File,
            name: path.to_string(),
            qualified_name: path.to_string(),
            file_path: Some(path.to_string()),
            span: Span::default(),
            snippet: format!("# {}\n", path),
        }
    }

    fn decl(id: i64, kind: GraphNodeKind, qualified: &str, path: Option<&str>) -> NodeRecord {
        NodeRecord {
            id,
            project_id: 1,
            kind,
            name: qualified.to_string(),
            qualified_name: qualified.to_string(),
            file_path: path.map(str::to_string),
            span: Span::default(),
            snippet: String::new(),
        }
    }

    fn edge(id: i64, source_id: i64, target_id: i64, kind: EdgeKind) -> EdgeRecord {
        EdgeRecord {
            id,
            project_id: 1,
            source_id,
            target_id,
            kind,
            file_path: None,
            span: Span::default(),
        }
    }

    fn paths(plan: &Plan) -> Vec<&str> {
        plan.order.iter().map(|&u| plan.units[u].path.as_str()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        // a imports module b, b.g calls c.h, d is independent
        let nodes = vec![
            file(1, "a.py"),
            file(2, "b.py"),
            file(3, "c.py"),
            file(4, "d.py"),
            decl(10, GraphNodeKind::Module, "b", None),
            decl(11, GraphNodeKind::Function, "b.g", Some("b.py")),
            decl(12, GraphNodeKind::Function, "c.h", Some("c.py")),
            decl(13, GraphNodeKind::Unknown, "print", Some("d.py")),
        ];
        let edges = vec![
            edge(1, 10, 2, EdgeKind::Contains),
            edge(2, 1, 10, EdgeKind::Imports),
            edge(3, 11, 12, EdgeKind::Calls),
            edge(4, 4, 13, EdgeKind::Calls),
        ];
        let plan = Plan::build(&nodes, &edges, &HashSet::new());

        assert_eq!(paths(&plan), vec!["c.py", "b.py", "a.py", "d.py"]);
        assert!(plan.cycle_peers.iter().all(|p| p.is_empty()));
        assert_eq!(plan.deps[0], BTreeSet::from([1]));
    }

    #[test]
    fn test_cycle_members_are_flagged() {
        let nodes = vec![file(1, "a.py"), file(2, "b.py"), file(3, "c.py")];
        let edges = vec![
            edge(1, 1, 2, EdgeKind::Imports),
            edge(2, 2, 1, EdgeKind::Imports),
            edge(3, 3, 1, EdgeKind::Imports),
            // self edges are ignored
            edge(4, 3, 3, EdgeKind::Calls),
        ];
        let degraded = HashSet::from(["c.py".to_string()]);
        let plan = Plan::build(&nodes, &edges, &degraded);

        assert_eq!(paths(&plan), vec!["a.py", "b.py", "c.py"]);
        assert_eq!(plan.cycle_peers[0], vec![1]);
        assert_eq!(plan.cycle_peers[1], vec![0]);
        assert!(plan.cycle_peers[2].is_empty());
        assert!(plan.units[2].degraded);
        assert_eq!(plan.position_of("b.py"), Some(1));
        assert_eq!(plan.position_of("z.py"), None);
    }

    #[test]
    fn test_ties_break_by_path() {
        let nodes = vec![file(1, "z.py"), file(2, "m.py"), file(3, "a.py")];
        let plan = Plan::build(&nodes, &[], &HashSet::new());
        assert_eq!(paths(&plan), vec!["a.py", "m.py", "z.py"]);
    }
}
