//! Data models for the code graph storage

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::core::normalize::Span;

/// Enums persisted as their snake_case name in a TEXT column
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(
    /// Kind of a persisted graph node
    GraphNodeKind {
        File => "file",
        Module => "module",
        Class => "class",
        Function => "function",
        Variable => "variable",
        Import => "import",
        Unknown => "unknown",
    }
);

text_enum!(
    /// Kind of a persisted graph edge
    EdgeKind {
        Contains => "contains",
        Calls => "calls",
        Imports => "imports",
        References => "references",
        Inherits => "inherits",
    }
);

text_enum!(
    /// Project lifecycle
    ProjectStatus {
        Uploaded => "uploaded",
        Parsed => "parsed",
        Converted => "converted",
        Failed => "failed",
    }
);

text_enum!(
    /// Conversion job state machine
    JobState {
        Created => "created",
        Ordering => "ordering",
        Converting => "converting",
        Assembling => "assembling",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

text_enum!(
    /// Per-unit conversion status
    UnitStatus {
        Pending => "pending",
        Converted => "converted",
        Skipped => "skipped",
        Failed => "failed",
    }
);

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UnitStatus::Pending)
    }
}

/// Traversal direction for neighborhood queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outgoing" | "out" => Ok(Direction::Outgoing),
            "incoming" | "in" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// What a symbol search matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Simple or qualified name
    #[default]
    Name,
    /// Raw source text of the node
    Snippet,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(SearchMode::Name),
            "snippet" | "code" => Ok(SearchMode::Snippet),
            other => Err(format!("unknown search mode '{}'", other)),
        }
    }
}

/// Project record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub source_language: String,
    pub source_framework: Option<String>,
    pub status: ProjectStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// File record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub project_id: i64,
    pub path: String,
    pub language: String,
    pub content_hash: String,
    /// Why the adapter could not model this file, if it could not
    pub degraded: Option<String>,
    pub parsed_at: DateTime<Utc>,
}

/// Node record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub project_id: i64,
    pub kind: GraphNodeKind,
    pub name: String,
    pub qualified_name: String,
    pub file_path: Option<String>,
    pub span: Span,
    pub snippet: String,
}

/// Edge record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: i64,
    pub project_id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub kind: EdgeKind,
    pub file_path: Option<String>,
    pub span: Span,
}

/// Node data produced by the graph builder (before storage)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeData {
    pub kind: GraphNodeKind,
    pub name: String,
    pub qualified_name: String,
    pub file_path: Option<String>,
    pub span: Span,
    pub snippet: String,
}

/// Edge data produced by the graph builder, endpoints are indices into the
/// node list it came with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeData {
    pub source_idx: usize,
    pub target_idx: usize,
    pub kind: EdgeKind,
    pub file_path: Option<String>,
    pub span: Span,
}

/// File metadata written alongside a parse
#[derive(Debug, Clone)]
pub struct FileData {
    pub path: String,
    pub language: String,
    pub content_hash: String,
    pub degraded: Option<String>,
}

/// A node reached by a neighborhood traversal
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub node: NodeRecord,
    /// Hops from the start node
    pub distance: u32,
    /// Kind of the edge the node was first reached through
    pub via: EdgeKind,
}

/// Graph size for a project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub files: u32,
    pub nodes: u32,
    pub edges: u32,
}

/// Recorded question and answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnRecord {
    pub id: i64,
    pub project_id: i64,
    pub question: String,
    pub answer: String,
    pub context_node_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Conversion job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub project_id: i64,
    pub target_language: String,
    pub target_framework: Option<String>,
    pub state: JobState,
    pub error: Option<String>,
    /// Aggregated target dependencies, package name to version
    pub dependencies: BTreeMap<String, String>,
    /// Set when a later request for the same project replaced this job
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Startup file generated when no converted unit provides one
    #[serde(default)]
    pub entry_point: Option<GeneratedFile>,
}

/// File produced for a job as a whole rather than converted from one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// One conversion unit of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub job_id: String,
    /// Position in conversion order
    pub position: u32,
    pub node_id: i64,
    pub source_path: String,
    pub status: UnitStatus,
    pub reason: Option<String>,
    pub cycle_note: Option<String>,
    pub output_path: Option<String>,
    pub output: Option<String>,
    pub notes: Option<String>,
}
