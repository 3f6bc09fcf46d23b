//! SQLite database implementation

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

use super::models::{
    ChatTurnRecord, Direction, EdgeData, EdgeKind, EdgeRecord, FileData, FileRecord, GraphStats,
    GeneratedFile, JobRecord, JobState, Neighbor, NodeData, NodeRecord, ProjectRecord,
    ProjectStatus, UnitRecord,
};
use super::{StoreError, StoreResult};
use crate::core::normalize::Span;

const NODE_COLUMNS: &str = "id, project_id, kind, name, qualified_name, file_path, \
                            start_byte, end_byte, start_line, end_line, snippet";
const EDGE_COLUMNS: &str = "id, project_id, source_id, target_id, kind, file_path, \
                            start_byte, end_byte, start_line, end_line";
const PROJECT_COLUMNS: &str = "id, name, root_path, source_language, source_framework, \
                               status, last_error, created_at, updated_at";
const JOB_COLUMNS: &str = "id, project_id, target_language, target_framework, state, error, \
                           dependencies, superseded, created_at, updated_at, entry_point";
const UNIT_COLUMNS: &str = "job_id, position, node_id, source_path, status, reason, \
                            cycle_note, output_path, output, notes";

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        // Enable foreign keys
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    /// Initialize the database schema
    pub fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            -- Projects table
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                root_path TEXT NOT NULL,
                source_language TEXT NOT NULL,
                source_framework TEXT,
                status TEXT NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Files table
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                language TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                degraded TEXT,
                parsed_at TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                UNIQUE(project_id, path)
            );

            -- Nodes table
            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                qualified_name TEXT NOT NULL,
                file_path TEXT,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                snippet TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            -- Edges table
            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                file_path TEXT,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                FOREIGN KEY (source_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            -- Chat history
            CREATE TABLE IF NOT EXISTS chat_turns (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                context_node_ids TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            -- Conversion jobs
            CREATE TABLE IF NOT EXISTS conversion_jobs (
                id TEXT PRIMARY KEY,
                project_id INTEGER NOT NULL,
                target_language TEXT NOT NULL,
                target_framework TEXT,
                state TEXT NOT NULL,
                error TEXT,
                dependencies TEXT NOT NULL,
                superseded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                entry_point TEXT,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            -- Conversion units; node_id is a snapshot id and survives re-parses
            CREATE TABLE IF NOT EXISTS conversion_units (
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                node_id INTEGER NOT NULL,
                source_path TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT,
                cycle_note TEXT,
                output_path TEXT,
                output TEXT,
                notes TEXT,
                PRIMARY KEY (job_id, position),
                FOREIGN KEY (job_id) REFERENCES conversion_jobs(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_project ON nodes(project_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
            CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
            CREATE INDEX IF NOT EXISTS idx_nodes_qualified ON nodes(qualified_name);
            CREATE INDEX IF NOT EXISTS idx_edges_project ON edges(project_id);
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
            CREATE INDEX IF NOT EXISTS idx_edges_kind ON edges(kind);
            CREATE INDEX IF NOT EXISTS idx_chat_project ON chat_turns(project_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_project ON conversion_jobs(project_id);
            "#,
        )?;

        // job tables created before entry points were generated
        let has_entry_point: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('conversion_jobs') WHERE name = 'entry_point'",
            [],
            |row| row.get(0),
        )?;
        if has_entry_point == 0 {
            self.conn
                .execute("ALTER TABLE conversion_jobs ADD COLUMN entry_point TEXT", [])?;
        }

        Ok(())
    }

    // ==================== Project Operations ====================

    /// Insert a new project, returns its id
    pub fn insert_project(
        &self,
        name: &str,
        root_path: &str,
        source_language: &str,
        source_framework: Option<&str>,
    ) -> StoreResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO projects (name, root_path, source_language, source_framework, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                name,
                root_path,
                source_language,
                source_framework,
                ProjectStatus::Uploaded,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a project by id
    pub fn get_project(&self, project_id: i64) -> StoreResult<ProjectRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![project_id],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("project", project_id))
    }

    /// Get a project by its name
    pub fn get_project_by_name(&self, name: &str) -> StoreResult<Option<ProjectRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM projects WHERE name = ?1 ORDER BY id LIMIT 1",
                    PROJECT_COLUMNS
                ),
                params![name],
                project_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all projects
    pub fn list_projects(&self) -> StoreResult<Vec<ProjectRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS))?;
        let rows = stmt.query_map([], project_from_row)?;
        collect_rows(rows)
    }

    /// Delete a project and everything it owns
    pub fn delete_project(&self, project_id: i64) -> StoreResult<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
        if deleted == 0 {
            return Err(StoreError::not_found("project", project_id));
        }
        Ok(())
    }

    /// Update project lifecycle status
    pub fn set_project_status(
        &self,
        project_id: i64,
        status: ProjectStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE projects SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status, last_error, Utc::now().to_rfc3339(), project_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("project", project_id));
        }
        Ok(())
    }

    fn ensure_project(&self, project_id: i64) -> StoreResult<()> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found("project", project_id)),
        }
    }

    // ==================== Graph Writes ====================

    /// Start an atomic parse: the project's previous files, nodes and edges are
    /// cleared inside the transaction and only disappear on commit.
    pub fn begin_parse(&self, project_id: i64) -> StoreResult<ParseTransaction<'_>> {
        self.ensure_project(project_id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM edges WHERE project_id = ?1", params![project_id])?;
        tx.execute("DELETE FROM nodes WHERE project_id = ?1", params![project_id])?;
        tx.execute("DELETE FROM files WHERE project_id = ?1", params![project_id])?;
        Ok(ParseTransaction { tx, project_id })
    }

    // ==================== Graph Reads ====================

    /// Get a node by id
    pub fn get_node(&self, node_id: i64) -> StoreResult<NodeRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
                params![node_id],
                node_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("node", node_id))
    }

    /// Breadth-first neighborhood of a node along the given edge kinds (all
    /// kinds when empty), up to `depth` hops
    pub fn neighbors(
        &self,
        node_id: i64,
        kinds: &[EdgeKind],
        direction: Direction,
        depth: u32,
    ) -> StoreResult<Vec<Neighbor>> {
        let start = self.get_node(node_id)?;

        let mut seen: HashSet<i64> = HashSet::from([start.id]);
        let mut queue = VecDeque::from([(start.id, 0u32)]);
        let mut reached: Vec<(i64, u32, EdgeKind)> = Vec::new();

        while let Some((current, distance)) = queue.pop_front() {
            if distance >= depth {
                continue;
            }
            for (next, kind) in self.adjacent(current, direction)? {
                if !kinds.is_empty() && !kinds.contains(&kind) {
                    continue;
                }
                if seen.insert(next) {
                    reached.push((next, distance + 1, kind));
                    queue.push_back((next, distance + 1));
                }
            }
        }

        let mut result = Vec::with_capacity(reached.len());
        for (id, distance, via) in reached {
            result.push(Neighbor {
                node: self.get_node(id)?,
                distance,
                via,
            });
        }
        Ok(result)
    }

    fn adjacent(&self, node_id: i64, direction: Direction) -> StoreResult<Vec<(i64, EdgeKind)>> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT target_id, kind FROM edges WHERE source_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![node_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, EdgeKind>(1)?))
            })?;
            out.extend(collect_rows(rows)?);
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT source_id, kind FROM edges WHERE target_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![node_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, EdgeKind>(1)?))
            })?;
            out.extend(collect_rows(rows)?);
        }
        Ok(out)
    }

    /// Nodes whose simple or qualified name contains `query`
    pub fn search_by_name(&self, project_id: i64, query: &str, limit: u32) -> StoreResult<Vec<NodeRecord>> {
        self.ensure_project(project_id)?;
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM nodes
             WHERE project_id = ?1
               AND (name LIKE ?2 ESCAPE '\\' OR qualified_name LIKE ?2 ESCAPE '\\')
             ORDER BY qualified_name, id
             LIMIT ?3",
            NODE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id, pattern, limit], node_from_row)?;
        collect_rows(rows)
    }

    /// Nodes whose raw snippet contains `text`
    pub fn search_by_snippet(&self, project_id: i64, text: &str, limit: u32) -> StoreResult<Vec<NodeRecord>> {
        self.ensure_project(project_id)?;
        let pattern = format!("%{}%", escape_like(text));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM nodes
             WHERE project_id = ?1 AND kind != 'file' AND snippet LIKE ?2 ESCAPE '\\'
             ORDER BY qualified_name, id
             LIMIT ?3",
            NODE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id, pattern, limit], node_from_row)?;
        collect_rows(rows)
    }

    /// Every node of a project, in insertion order
    pub fn list_nodes(&self, project_id: i64) -> StoreResult<Vec<NodeRecord>> {
        self.ensure_project(project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE project_id = ?1 ORDER BY id",
            NODE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], node_from_row)?;
        collect_rows(rows)
    }

    /// Every edge of a project, in insertion order
    pub fn list_edges(&self, project_id: i64) -> StoreResult<Vec<EdgeRecord>> {
        self.ensure_project(project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM edges WHERE project_id = ?1 ORDER BY id",
            EDGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], edge_from_row)?;
        collect_rows(rows)
    }

    /// Files recorded by the last parse, ordered by path
    pub fn list_files(&self, project_id: i64) -> StoreResult<Vec<FileRecord>> {
        self.ensure_project(project_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, path, language, content_hash, degraded, parsed_at
             FROM files WHERE project_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(FileRecord {
                id: row.get(0)?,
                project_id: row.get(1)?,
                path: row.get(2)?,
                language: row.get(3)?,
                content_hash: row.get(4)?,
                degraded: row.get(5)?,
                parsed_at: timestamp(row, 6)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Incoming edge count per node, for centrality ranking
    pub fn in_degrees(&self, project_id: i64) -> StoreResult<HashMap<i64, u32>> {
        self.ensure_project(project_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT target_id, COUNT(*) FROM edges WHERE project_id = ?1 GROUP BY target_id",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?))
        })?;
        Ok(collect_rows(rows)?.into_iter().collect())
    }

    /// File, node and edge counts for a project
    pub fn graph_stats(&self, project_id: i64) -> StoreResult<GraphStats> {
        self.ensure_project(project_id)?;
        let count = |table: &str| -> StoreResult<u32> {
            Ok(self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE project_id = ?1", table),
                params![project_id],
                |row| row.get(0),
            )?)
        };
        Ok(GraphStats {
            files: count("files")?,
            nodes: count("nodes")?,
            edges: count("edges")?,
        })
    }

    // ==================== Chat History ====================

    /// Append a chat turn
    pub fn insert_chat_turn(
        &self,
        project_id: i64,
        question: &str,
        answer: &str,
        context_node_ids: &[i64],
    ) -> StoreResult<ChatTurnRecord> {
        self.ensure_project(project_id)?;
        let created_at = Utc::now();
        let ids = serde_json::to_string(context_node_ids).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO chat_turns (project_id, question, answer, context_node_ids, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, question, answer, ids, created_at.to_rfc3339()],
        )?;
        Ok(ChatTurnRecord {
            id: self.conn.last_insert_rowid(),
            project_id,
            question: question.to_string(),
            answer: answer.to_string(),
            context_node_ids: context_node_ids.to_vec(),
            created_at,
        })
    }

    /// Chat turns of a project, oldest first
    pub fn list_chat_turns(&self, project_id: i64) -> StoreResult<Vec<ChatTurnRecord>> {
        self.ensure_project(project_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, question, answer, context_node_ids, created_at
             FROM chat_turns WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ChatTurnRecord {
                id: row.get(0)?,
                project_id: row.get(1)?,
                question: row.get(2)?,
                answer: row.get(3)?,
                context_node_ids: json_column(row, 4)?,
                created_at: timestamp(row, 5)?,
            })
        })?;
        collect_rows(rows)
    }

    // ==================== Conversion Jobs ====================

    /// Insert a new job; earlier jobs of the same project are marked superseded
    pub fn insert_job(&self, job: &JobRecord) -> StoreResult<()> {
        self.ensure_project(job.project_id)?;
        let dependencies =
            serde_json::to_string(&job.dependencies).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let entry_point = job
            .entry_point
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE conversion_jobs SET superseded = 1 WHERE project_id = ?1",
            params![job.project_id],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO conversion_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.project_id,
                job.target_language,
                job.target_framework,
                job.state,
                job.error,
                dependencies,
                job.superseded,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                entry_point
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Get a job by id
    pub fn get_job(&self, job_id: &str) -> StoreResult<JobRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM conversion_jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("job", job_id))
    }

    /// Jobs of a project, newest first
    pub fn list_jobs(&self, project_id: i64) -> StoreResult<Vec<JobRecord>> {
        self.ensure_project(project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM conversion_jobs WHERE project_id = ?1 ORDER BY created_at DESC, id",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], job_from_row)?;
        collect_rows(rows)
    }

    /// Jobs not yet in a terminal state
    pub fn list_unfinished_jobs(&self) -> StoreResult<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM conversion_jobs
             WHERE state NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY created_at, id",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([], job_from_row)?;
        collect_rows(rows)
    }

    /// Persist a state transition
    pub fn set_job_state(&self, job_id: &str, state: JobState, error: Option<&str>) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE conversion_jobs SET state = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![state, error, Utc::now().to_rfc3339(), job_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("job", job_id));
        }
        debug!(job_id, state = %state, "Job state persisted");
        Ok(())
    }

    /// Store the aggregated target dependencies of a job
    pub fn set_job_dependencies(
        &self,
        job_id: &str,
        dependencies: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let encoded =
            serde_json::to_string(dependencies).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let updated = self.conn.execute(
            "UPDATE conversion_jobs SET dependencies = ?1, updated_at = ?2 WHERE id = ?3",
            params![encoded, Utc::now().to_rfc3339(), job_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("job", job_id));
        }
        Ok(())
    }

    /// Store the startup file generated for a job
    pub fn set_job_entry_point(&self, job_id: &str, file: &GeneratedFile) -> StoreResult<()> {
        let encoded = serde_json::to_string(file).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let updated = self.conn.execute(
            "UPDATE conversion_jobs SET entry_point = ?1, updated_at = ?2 WHERE id = ?3",
            params![encoded, Utc::now().to_rfc3339(), job_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("job", job_id));
        }
        Ok(())
    }

    /// Insert the unit plan of a job
    pub fn insert_units(&self, units: &[UnitRecord]) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO conversion_units ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                UNIT_COLUMNS
            ))?;
            for unit in units {
                stmt.execute(params![
                    unit.job_id,
                    unit.position,
                    unit.node_id,
                    unit.source_path,
                    unit.status,
                    unit.reason,
                    unit.cycle_note,
                    unit.output_path,
                    unit.output,
                    unit.notes
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist a unit transition
    pub fn update_unit(&self, unit: &UnitRecord) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE conversion_units
             SET status = ?1, reason = ?2, cycle_note = ?3, output_path = ?4, output = ?5, notes = ?6
             WHERE job_id = ?7 AND position = ?8",
            params![
                unit.status,
                unit.reason,
                unit.cycle_note,
                unit.output_path,
                unit.output,
                unit.notes,
                unit.job_id,
                unit.position
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found(
                "unit",
                format!("{}#{}", unit.job_id, unit.position),
            ));
        }
        Ok(())
    }

    /// Units of a job in conversion order
    pub fn list_units(&self, job_id: &str) -> StoreResult<Vec<UnitRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM conversion_units WHERE job_id = ?1 ORDER BY position",
            UNIT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok(UnitRecord {
                job_id: row.get(0)?,
                position: row.get(1)?,
                node_id: row.get(2)?,
                source_path: row.get(3)?,
                status: row.get(4)?,
                reason: row.get(5)?,
                cycle_note: row.get(6)?,
                output_path: row.get(7)?,
                output: row.get(8)?,
                notes: row.get(9)?,
            })
        })?;
        collect_rows(rows)
    }
}

/// Writes of a single parse. Dropping it without [`commit`] rolls back and
/// leaves the previous graph in place.
///
/// [`commit`]: ParseTransaction::commit
pub struct ParseTransaction<'conn> {
    tx: Transaction<'conn>,
    project_id: i64,
}

impl ParseTransaction<'_> {
    /// Record the files of this parse
    pub fn insert_files(&self, files: &[FileData]) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = self.tx.prepare(
            "INSERT INTO files (project_id, path, language, content_hash, degraded, parsed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for file in files {
            stmt.execute(params![
                self.project_id,
                file.path,
                file.language,
                file.content_hash,
                file.degraded,
                now
            ])?;
        }
        Ok(())
    }

    /// Insert nodes, returning their ids in input order
    pub fn upsert_nodes(&self, nodes: &[NodeData]) -> StoreResult<Vec<i64>> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO nodes (project_id, kind, name, qualified_name, file_path,
                                start_byte, end_byte, start_line, end_line, snippet)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            stmt.execute(params![
                self.project_id,
                node.kind,
                node.name,
                node.qualified_name,
                node.file_path,
                node.span.start_byte as i64,
                node.span.end_byte as i64,
                node.span.start_line,
                node.span.end_line,
                node.snippet
            ])?;
            ids.push(self.tx.last_insert_rowid());
        }
        Ok(ids)
    }

    /// Insert edges whose endpoints index into `node_ids`
    pub fn upsert_edges(&self, node_ids: &[i64], edges: &[EdgeData]) -> StoreResult<usize> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO edges (project_id, source_id, target_id, kind, file_path,
                                start_byte, end_byte, start_line, end_line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for edge in edges {
            let (Some(source), Some(target)) =
                (node_ids.get(edge.source_idx), node_ids.get(edge.target_idx))
            else {
                return Err(StoreError::Corrupt(format!(
                    "edge {} -> {} points outside the node list",
                    edge.source_idx, edge.target_idx
                )));
            };
            stmt.execute(params![
                self.project_id,
                source,
                target,
                edge.kind,
                edge.file_path,
                edge.span.start_byte as i64,
                edge.span.end_byte as i64,
                edge.span.start_line,
                edge.span.end_line
            ])?;
        }
        Ok(edges.len())
    }

    /// Make the new graph visible
    pub fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

// ==================== Row Mapping ====================

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> StoreResult<Vec<T>> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn span_at(row: &Row, first: usize) -> rusqlite::Result<Span> {
    Ok(Span {
        start_byte: row.get::<_, i64>(first)? as usize,
        end_byte: row.get::<_, i64>(first + 1)? as usize,
        start_line: row.get(first + 2)?,
        end_line: row.get(first + 3)?,
    })
}

fn project_from_row(row: &Row) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        source_language: row.get(3)?,
        source_framework: row.get(4)?,
        status: row.get(5)?,
        last_error: row.get(6)?,
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
    })
}

fn node_from_row(row: &Row) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        qualified_name: row.get(4)?,
        file_path: row.get(5)?,
        span: span_at(row, 6)?,
        snippet: row.get(10)?,
    })
}

fn edge_from_row(row: &Row) -> rusqlite::Result<EdgeRecord> {
    Ok(EdgeRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        source_id: row.get(2)?,
        target_id: row.get(3)?,
        kind: row.get(4)?,
        file_path: row.get(5)?,
        span: span_at(row, 6)?,
    })
}

fn job_from_row(row: &Row) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        target_language: row.get(2)?,
        target_framework: row.get(3)?,
        state: row.get(4)?,
        error: row.get(5)?,
        dependencies: json_column(row, 6)?,
        superseded: row.get(7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
        entry_point: optional_json_column(row, 10)?,
    })
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
