//! Retrieval over the code graph for question answering
//!
//! A question is tokenized into identifier candidates, matched against node
//! names, and each match's neighborhood is pulled in. Candidates are ranked
//! by match strength, graph distance and in-degree, then serialized into a
//! context block that fits the character budget.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::core::config::QueryConfig;
use crate::core::error::Result;
use crate::llm::Prompt;
use crate::storage::models::{Direction, EdgeKind, GraphNodeKind, NodeRecord};
use crate::storage::Database;

pub const SYSTEM_PROMPT: &str = "You are an expert software engineer and code modernization specialist.";

/// Matches kept as expansion seeds
const MAX_SEEDS: usize = 10;

/// Related names listed per relationship
const MAX_RELATED: usize = 8;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "be", "by", "can", "code", "do", "does", "for", "from", "how", "i", "in",
    "is", "it", "me", "of", "on", "or", "the", "this", "that", "to", "use", "used", "what", "when",
    "where", "which", "who", "why", "with",
];

/// How strongly a node name matched a question token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchStrength {
    Substring = 1,
    CaseInsensitive = 2,
    Exact = 3,
}

/// Context selected for one question
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    /// Nodes whose content made it into `text`, most relevant first
    pub node_ids: Vec<i64>,
    pub text: String,
    /// No name matched; `text` is the project's file list
    pub fallback: bool,
}

struct Candidate {
    node: NodeRecord,
    score: u64,
    is_seed: bool,
}

/// Read-only retrieval over one project's graph
pub struct QueryEngine<'a> {
    db: &'a Database,
    config: &'a QueryConfig,
}

impl<'a> QueryEngine<'a> {
    pub fn new(db: &'a Database, config: &'a QueryConfig) -> Self {
        Self { db, config }
    }

    /// Select and serialize the subgraph relevant to `question`
    pub fn retrieve(&self, project_id: i64, question: &str) -> Result<RetrievedContext> {
        let tokens = tokenize(question);
        let nodes = self.db.list_nodes(project_id)?;

        let mut seeds: Vec<(MatchStrength, &NodeRecord)> = nodes
            .iter()
            .filter(|n| is_answerable(n.kind))
            .filter_map(|n| best_match(n, &tokens).map(|strength| (strength, n)))
            .collect();
        seeds.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.qualified_name.cmp(&b.1.qualified_name))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        seeds.truncate(MAX_SEEDS);

        if seeds.is_empty() {
            debug!(project_id, ?tokens, "No node matched the question, using file list");
            return self.file_list_context(project_id, &nodes);
        }

        let in_degrees = self.db.in_degrees(project_id)?;
        let mut candidates: HashMap<i64, Candidate> = HashMap::new();
        let expand_kinds = [EdgeKind::Contains, EdgeKind::Calls, EdgeKind::References];

        for (strength, seed) in &seeds {
            let weight = *strength as u64 * 100;
            offer(&mut candidates, (*seed).clone(), weight, true, &in_degrees);

            let neighborhood =
                self.db
                    .neighbors(seed.id, &expand_kinds, Direction::Both, self.config.expansion_depth)?;
            for neighbor in neighborhood {
                if !is_answerable(neighbor.node.kind) {
                    continue;
                }
                let score = weight / (neighbor.distance as u64 + 1);
                offer(&mut candidates, neighbor.node, score, false, &in_degrees);
            }
        }

        let mut ranked: Vec<Candidate> = candidates.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.node.qualified_name.cmp(&b.node.qualified_name))
                .then_with(|| a.node.id.cmp(&b.node.id))
        });

        let budget = self.config.context_budget_chars;
        let mut text = String::new();
        let mut node_ids = Vec::new();
        for candidate in &ranked {
            let entry = self.render(candidate, budget / 2)?;
            if text.len() + entry.len() > budget {
                continue;
            }
            text.push_str(&entry);
            node_ids.push(candidate.node.id);
        }

        debug!(
            project_id,
            seeds = seeds.len(),
            candidates = ranked.len(),
            included = node_ids.len(),
            chars = text.len(),
            "Retrieved question context"
        );
        Ok(RetrievedContext {
            node_ids,
            text,
            fallback: false,
        })
    }

    fn file_list_context(&self, project_id: i64, nodes: &[NodeRecord]) -> Result<RetrievedContext> {
        let files = self.db.list_files(project_id)?;
        let by_path: HashMap<&str, i64> = nodes
            .iter()
            .filter(|n| n.kind == GraphNodeKind::File)
            .map(|n| (n.qualified_name.as_str(), n.id))
            .collect();

        let mut text = format!("Project files ({}):\n", files.len());
        let mut node_ids = Vec::new();
        for file in &files {
            let line = format!("- {}\n", file.path);
            if text.len() + line.len() > self.config.context_budget_chars {
                break;
            }
            text.push_str(&line);
            if let Some(id) = by_path.get(file.path.as_str()) {
                node_ids.push(*id);
            }
        }
        Ok(RetrievedContext {
            node_ids,
            text,
            fallback: true,
        })
    }

    /// Header, relationships and snippet of one candidate
    fn render(&self, candidate: &Candidate, snippet_limit: usize) -> Result<String> {
        let node = &candidate.node;
        let mut out = format!("### {} {}", node.kind, node.qualified_name);
        if let Some(path) = &node.file_path {
            out.push_str(&format!(" ({}:{}-{})", path, node.span.start_line, node.span.end_line));
        }
        out.push('\n');

        for (label, names) in self.relationships(node.id)? {
            out.push_str(&format!("{}: {}\n", label, names.join(", ")));
        }

        // whole-file snippets only when the file itself was asked about
        let show_snippet = node.kind != GraphNodeKind::File || candidate.is_seed;
        if show_snippet && !node.snippet.is_empty() {
            out.push_str("```\n");
            out.push_str(truncate_chars(&node.snippet, snippet_limit));
            if !node.snippet.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n");
        }
        out.push('\n');
        Ok(out)
    }

    fn relationships(&self, node_id: i64) -> Result<BTreeMap<&'static str, Vec<String>>> {
        let mut related: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        let kinds = [EdgeKind::Calls, EdgeKind::References, EdgeKind::Inherits, EdgeKind::Imports];

        for direction in [Direction::Outgoing, Direction::Incoming] {
            for neighbor in self.db.neighbors(node_id, &kinds, direction, 1)? {
                let label = relationship_label(neighbor.via, direction);
                let names = related.entry(label).or_default();
                if names.len() < MAX_RELATED {
                    names.push(neighbor.node.qualified_name);
                }
            }
        }
        Ok(related)
    }
}

fn offer(
    candidates: &mut HashMap<i64, Candidate>,
    node: NodeRecord,
    relevance: u64,
    is_seed: bool,
    in_degrees: &HashMap<i64, u32>,
) {
    let centrality = in_degrees.get(&node.id).copied().unwrap_or(0).min(20) as u64;
    let score = relevance + centrality;
    match candidates.get_mut(&node.id) {
        Some(existing) => {
            existing.score = existing.score.max(score);
            existing.is_seed |= is_seed;
        }
        None => {
            candidates.insert(node.id, Candidate { node, score, is_seed });
        }
    }
}

fn relationship_label(kind: EdgeKind, direction: Direction) -> &'static str {
    match (kind, direction) {
        (EdgeKind::Calls, Direction::Incoming) => "called by",
        (EdgeKind::Calls, _) => "calls",
        (EdgeKind::References, Direction::Incoming) => "referenced by",
        (EdgeKind::References, _) => "references",
        (EdgeKind::Inherits, Direction::Incoming) => "inherited by",
        (EdgeKind::Inherits, _) => "inherits",
        (EdgeKind::Imports, Direction::Incoming) => "imported by",
        (EdgeKind::Imports, _) => "imports",
        (EdgeKind::Contains, Direction::Incoming) => "contained in",
        (EdgeKind::Contains, _) => "contains",
    }
}

/// Placeholders and import statements carry no code worth showing
fn is_answerable(kind: GraphNodeKind) -> bool {
    !matches!(kind, GraphNodeKind::Unknown | GraphNodeKind::Import)
}

/// Identifier candidates of a question, in order of appearance, deduplicated
/// case-insensitively
pub fn tokenize(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .filter(|t| !STOPWORDS.contains(&t.to_lowercase().as_str()))
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn best_match(node: &NodeRecord, tokens: &[String]) -> Option<MatchStrength> {
    tokens
        .iter()
        .filter_map(|token| {
            if node.name == *token || node.qualified_name == *token {
                Some(MatchStrength::Exact)
            } else if node.name.eq_ignore_ascii_case(token) || node.qualified_name.eq_ignore_ascii_case(token) {
                Some(MatchStrength::CaseInsensitive)
            } else if token.chars().count() >= 3
                && node.name.to_lowercase().contains(&token.to_lowercase())
            {
                Some(MatchStrength::Substring)
            } else {
                None
            }
        })
        .max()
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Prompt sent to the completion service for a question
pub fn question_prompt(source_language: &str, question: &str, context: &RetrievedContext) -> Prompt {
    let user = format!(
        "You are an expert software engineer analyzing a {} codebase.\n\n\
         Codebase Context:\n{}\n\n\
         Question: {}\n\n\
         Please provide a helpful and accurate response based on the codebase context. \
         Be specific and reference the actual code structure when possible.",
        source_language, context.text, question
    );
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}
