//! Service facade
//!
//! `CodeShift` owns the database, the language registry, the completion
//! service and the per-project locks. The HTTP handlers and the CLI both go
//! through it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::convert::{new_job, write_archive, Manifest, Orchestrator, Snapshot};
use crate::core::error::{CodeShiftError, Result};
use crate::core::frameworks::{self, Framework};
use crate::core::graph::{store_project_graph, GraphBuilder, ParseStats, ProjectGraph};
use crate::core::locks::ProjectLocks;
use crate::core::parser::CodeParser;
use crate::core::query::{question_prompt, QueryEngine};
use crate::languages::LanguageRegistry;
use crate::llm::{self, complete_with_retry, Budget, CompletionService, RetryPolicy};
use crate::storage::models::{
    ChatTurnRecord, Direction, EdgeKind, GraphNodeKind, GraphStats, JobRecord, JobState, Neighbor,
    NodeRecord, ProjectRecord, ProjectStatus, SearchMode, UnitRecord, UnitStatus,
};
use crate::storage::Database;

/// Result of a parse
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub project_id: i64,
    pub status: ProjectStatus,
    #[serde(flatten)]
    pub stats: ParseStats,
}

/// Project with its current graph size and jobs
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOverview {
    #[serde(flatten)]
    pub project: ProjectRecord,
    pub graph: GraphStats,
    pub jobs: Vec<JobRecord>,
}

/// Answer to a question about a project
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub context_node_ids: Vec<i64>,
    /// No symbol matched the question; the file list was used as context
    pub fallback: bool,
}

/// Job state together with its manifest
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub job: JobRecord,
    pub manifest: Manifest,
}

/// A source language and what it can be converted to
#[derive(Debug, Clone, Serialize)]
pub struct LanguageInfo {
    pub id: String,
    pub extensions: Vec<String>,
    pub conversion_targets: Vec<String>,
}

struct RunningJob {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

type JobTable = Arc<std::sync::Mutex<HashMap<String, RunningJob>>>;

/// Code knowledge graph service
pub struct CodeShift {
    db: Arc<Mutex<Database>>,
    registry: Arc<LanguageRegistry>,
    service: Arc<dyn CompletionService>,
    config: Config,
    policy: RetryPolicy,
    locks: ProjectLocks,
    jobs: JobTable,
}

impl CodeShift {
    /// Open the configured database and completion provider
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        let service = llm::from_config(&config.completion);
        Self::new(db, config, service)
    }

    /// Build the service over an already opened database
    pub fn new(db: Database, config: Config, service: Arc<dyn CompletionService>) -> Result<Self> {
        db.init_schema()?;
        info!(completion = service.name(), "CodeShift service ready");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            registry: Arc::new(LanguageRegistry::new()),
            service,
            policy: RetryPolicy::from_config(&config.completion),
            config,
            locks: ProjectLocks::new(),
            jobs: Arc::new(std::sync::Mutex::new(HashMap::new())),
        })
    }

    /// Override the timeout and retry policy used for completion calls
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Name of the completion backend in use
    pub fn completion_name(&self) -> &str {
        self.service.name()
    }

    // ==================== Projects ====================

    pub async fn register_project(
        &self,
        name: &str,
        root_path: &Path,
        source_language: &str,
        source_framework: Option<&str>,
    ) -> Result<ProjectRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CodeShiftError::InvalidRequest("project name is empty".to_string()));
        }
        let language = self
            .registry
            .get(source_language.trim())
            .ok_or_else(|| {
                CodeShiftError::InvalidRequest(format!("unsupported source language '{}'", source_language))
            })?
            .language_id();
        let framework = selected_framework(source_framework);
        if let Some(framework) = framework {
            if !frameworks::is_valid_framework(language, framework) {
                return Err(CodeShiftError::InvalidRequest(format!(
                    "unknown {} framework '{}'",
                    language, framework
                )));
            }
        }
        if !root_path.is_dir() {
            return Err(CodeShiftError::InvalidRequest(format!(
                "project root {:?} is not a directory",
                root_path
            )));
        }

        let db = self.db.lock().await;
        let id = db.insert_project(name, &root_path.to_string_lossy(), language, framework)?;
        info!(project_id = id, name, language, "Project registered");
        Ok(db.get_project(id)?)
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        Ok(self.db.lock().await.list_projects()?)
    }

    pub async fn get_project(&self, project_id: i64) -> Result<ProjectOverview> {
        let db = self.db.lock().await;
        Ok(ProjectOverview {
            project: db.get_project(project_id)?,
            graph: db.graph_stats(project_id)?,
            jobs: db.list_jobs(project_id)?,
        })
    }

    /// Project id from an id or a name
    pub async fn resolve_project(&self, id_or_name: &str) -> Result<i64> {
        if let Ok(id) = id_or_name.parse::<i64>() {
            return Ok(id);
        }
        self.db
            .lock()
            .await
            .get_project_by_name(id_or_name)?
            .map(|p| p.id)
            .ok_or_else(|| CodeShiftError::InvalidRequest(format!("no project named '{}'", id_or_name)))
    }

    /// Delete a project with its graph, chat history and jobs. Running jobs of
    /// the project are cancelled first.
    pub async fn delete_project(&self, project_id: i64) -> Result<()> {
        let _guard = self.locks.write(project_id).await;
        let db = self.db.lock().await;
        for job in db.list_jobs(project_id)? {
            self.signal_cancel(&job.id);
        }
        db.delete_project(project_id)?;
        drop(db);
        self.locks.forget(project_id);
        info!(project_id, "Project deleted");
        Ok(())
    }

    // ==================== Parsing ====================

    /// Parse every source file of the project and replace its graph. Parses of
    /// the same project are serialized; the previous graph stays visible
    /// until the new one is committed.
    pub async fn parse_project(&self, project_id: i64) -> Result<ParseOutcome> {
        let _guard = self.locks.write(project_id).await;
        let project = self.db.lock().await.get_project(project_id)?;
        info!(project_id, root = %project.root_path, language = %project.source_language, "Parsing project");

        let parser = CodeParser::new(Arc::clone(&self.registry), self.config.parser.clone());
        let root = PathBuf::from(&project.root_path);
        let language = project.source_language.clone();
        let built = tokio::task::spawn_blocking(move || -> Result<ProjectGraph> {
            let files = parser.collect_files(&root, &language)?;
            if files.is_empty() {
                return Err(CodeShiftError::ParseError(format!(
                    "no {} source files under {:?}",
                    language, root
                )));
            }
            let parsed = parser.parse_files(files)?;
            Ok(GraphBuilder::build(&parsed))
        })
        .await
        .map_err(|e| CodeShiftError::Internal(format!("parse task: {}", e)))?;

        let db = self.db.lock().await;
        let stored = built.and_then(|graph| {
            store_project_graph(&db, project_id, &graph)?;
            Ok(graph.stats)
        });
        match stored {
            Ok(stats) => {
                db.set_project_status(project_id, ProjectStatus::Parsed, None)?;
                info!(
                    project_id,
                    files = stats.files,
                    nodes = stats.nodes,
                    edges = stats.edges,
                    degraded = stats.degraded_files,
                    unresolved = stats.unresolved_references,
                    "Project parsed"
                );
                Ok(ParseOutcome {
                    project_id,
                    status: ProjectStatus::Parsed,
                    stats,
                })
            }
            Err(e) => {
                // a committed graph from an earlier parse stays usable
                let status = match db.get_project(project_id)?.status {
                    kept @ (ProjectStatus::Parsed | ProjectStatus::Converted) => kept,
                    _ => ProjectStatus::Failed,
                };
                warn!(project_id, error = %e, %status, "Parse failed");
                db.set_project_status(project_id, status, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    async fn parsed_project(&self, project_id: i64) -> Result<ProjectRecord> {
        let project = self.db.lock().await.get_project(project_id)?;
        match project.status {
            ProjectStatus::Parsed | ProjectStatus::Converted => Ok(project),
            _ => Err(CodeShiftError::ProjectNotParsed(project_id)),
        }
    }

    // ==================== Questions ====================

    /// Answer a question from the project's graph. The turn is recorded only
    /// when the completion service answered.
    pub async fn ask_question(&self, project_id: i64, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CodeShiftError::InvalidRequest("question is empty".to_string()));
        }
        let project = self.parsed_project(project_id).await?;

        let context = {
            let _guard = self.locks.read(project_id).await;
            let db = self.db.lock().await;
            QueryEngine::new(&db, &self.config.query).retrieve(project_id, question)?
        };
        debug!(
            project_id,
            nodes = context.node_ids.len(),
            chars = context.text.len(),
            fallback = context.fallback,
            "Question context retrieved"
        );

        let prompt = question_prompt(&project.source_language, question, &context);
        let budget = Budget::from_config(&self.config.completion);
        let answer = complete_with_retry(self.service.as_ref(), &prompt, budget, self.policy).await?;

        self.db
            .lock()
            .await
            .insert_chat_turn(project_id, question, &answer, &context.node_ids)?;
        Ok(Answer {
            answer,
            context_node_ids: context.node_ids,
            fallback: context.fallback,
        })
    }

    pub async fn chat_history(&self, project_id: i64) -> Result<Vec<ChatTurnRecord>> {
        Ok(self.db.lock().await.list_chat_turns(project_id)?)
    }

    // ==================== Conversion ====================

    /// Validate the request, snapshot the graph and start a conversion job in
    /// the background
    pub async fn convert_project(
        &self,
        project_id: i64,
        target_language: &str,
        target_framework: Option<&str>,
    ) -> Result<JobRecord> {
        let target_language = target_language.trim().to_ascii_lowercase();
        if target_language.is_empty() {
            return Err(CodeShiftError::InvalidRequest("target language is empty".to_string()));
        }
        let project = self.db.lock().await.get_project(project_id)?;
        if !frameworks::is_conversion_supported(&project.source_language, &target_language) {
            return Err(CodeShiftError::InvalidRequest(format!(
                "conversion from {} to {} is not supported",
                project.source_language, target_language
            )));
        }
        let target_framework = selected_framework(target_framework);
        if let Some(framework) = target_framework {
            if !frameworks::is_valid_framework(&target_language, framework) {
                return Err(CodeShiftError::InvalidRequest(format!(
                    "unknown {} framework '{}'",
                    target_language, framework
                )));
            }
        }

        let guard = self
            .locks
            .try_read(project_id)
            .ok_or(CodeShiftError::ProjectBusy(project_id))?;
        self.parsed_project(project_id).await?;
        let (job, snapshot) = {
            let db = self.db.lock().await;
            let snapshot = Snapshot::take(&db, project_id)?;
            let job = new_job(project_id, &target_language, target_framework);
            db.insert_job(&job)?;
            (job, snapshot)
        };
        drop(guard);

        info!(
            job_id = %job.id,
            project_id,
            target = %job.target_language,
            units = snapshot.plan.units.len(),
            "Conversion job created"
        );
        self.spawn_job(job.id.clone(), snapshot);
        Ok(job)
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.db),
            Arc::clone(&self.service),
            &self.config.completion,
            &self.config.conversion,
        )
        .with_policy(self.policy)
    }

    fn spawn_job(&self, job_id: String, snapshot: Snapshot) {
        let cancel = Arc::new(AtomicBool::new(false));
        let orchestrator = self.orchestrator();
        let jobs = Arc::clone(&self.jobs);

        // Registered before the task starts so it always finds its own entry
        let mut table = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let task_cancel = Arc::clone(&cancel);
        let task_id = job_id.clone();
        let handle = tokio::spawn(async move {
            let _ = orchestrator.run(&task_id, &snapshot, &task_cancel).await;
            jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(&task_id);
        });
        table.insert(
            job_id,
            RunningJob {
                cancel,
                handle: Some(handle),
            },
        );
    }

    fn signal_cancel(&self, job_id: &str) -> bool {
        let table = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match table.get(job_id) {
            Some(running) => {
                running.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Wait until a job started by this process stops running, then return
    /// its record
    pub async fn wait_for_job(&self, job_id: &str) -> Result<JobRecord> {
        let handle = {
            let mut table = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            table.get_mut(job_id).and_then(|running| running.handle.take())
        };
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| CodeShiftError::Internal(format!("conversion task: {}", e)))?;
        }
        Ok(self.db.lock().await.get_job(job_id)?)
    }

    pub async fn get_conversion_result(&self, job_id: &str) -> Result<ConversionResult> {
        let db = self.db.lock().await;
        let job = db.get_job(job_id)?;
        let units = db.list_units(job_id)?;
        let manifest = Manifest::new(&job, &units);
        Ok(ConversionResult { job, manifest })
    }

    pub async fn list_units(&self, job_id: &str) -> Result<Vec<UnitRecord>> {
        let db = self.db.lock().await;
        db.get_job(job_id)?;
        Ok(db.list_units(job_id)?)
    }

    /// Zip archive of a completed job's output
    pub async fn download_conversion_output(&self, job_id: &str) -> Result<Vec<u8>> {
        let (job, units, project) = {
            let db = self.db.lock().await;
            let job = db.get_job(job_id)?;
            if job.state != JobState::Completed {
                return Err(CodeShiftError::JobNotComplete(job_id.to_string()));
            }
            let units = db.list_units(job_id)?;
            let project = db.get_project(job.project_id)?;
            (job, units, project)
        };
        let manifest = Manifest::new(&job, &units);
        write_archive(&manifest, &units, job.entry_point.as_ref(), &project.name)
    }

    /// Request cancellation. A running job stops before its next unit; a job
    /// no task is driving is cancelled directly.
    pub async fn cancel_conversion(&self, job_id: &str) -> Result<JobRecord> {
        let db = self.db.lock().await;
        let job = db.get_job(job_id)?;
        if job.state.is_terminal() {
            return Ok(job);
        }
        if self.signal_cancel(job_id) {
            info!(job_id, "Cancellation requested");
            return Ok(job);
        }

        for mut unit in db.list_units(job_id)?.into_iter().filter(|u| !u.status.is_terminal()) {
            unit.status = UnitStatus::Skipped;
            unit.reason = Some("job cancelled".to_string());
            db.update_unit(&unit)?;
        }
        db.set_job_state(job_id, JobState::Cancelled, None)?;
        info!(job_id, "Idle conversion job cancelled");
        Ok(db.get_job(job_id)?)
    }

    /// Restart the jobs a previous process left unfinished
    pub async fn resume_incomplete_jobs(&self) -> Result<usize> {
        let mut resumed = 0;
        let jobs = self.db.lock().await.list_unfinished_jobs()?;
        for job in jobs {
            let snapshot = {
                let _guard = self.locks.read(job.project_id).await;
                let db = self.db.lock().await;
                match Snapshot::take(&db, job.project_id) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Cannot resume conversion job");
                        db.set_job_state(&job.id, JobState::Failed, Some(&e.to_string()))?;
                        continue;
                    }
                }
            };
            info!(job_id = %job.id, state = %job.state, "Resuming conversion job");
            self.spawn_job(job.id, snapshot);
            resumed += 1;
        }
        Ok(resumed)
    }

    // ==================== Graph queries ====================

    /// Nodes matching `query` by name or by source text
    pub async fn search_symbols(
        &self,
        project_id: i64,
        query: &str,
        mode: SearchMode,
        kind: Option<GraphNodeKind>,
        limit: u32,
    ) -> Result<Vec<NodeRecord>> {
        let db = self.db.lock().await;
        let nodes = match mode {
            SearchMode::Name => db.search_by_name(project_id, query, limit)?,
            SearchMode::Snippet => db.search_by_snippet(project_id, query, limit)?,
        };
        Ok(match kind {
            Some(kind) => nodes.into_iter().filter(|n| n.kind == kind).collect(),
            None => nodes,
        })
    }

    pub async fn get_node(&self, node_id: i64) -> Result<NodeRecord> {
        Ok(self.db.lock().await.get_node(node_id)?)
    }

    pub async fn neighbors(
        &self,
        node_id: i64,
        kinds: &[EdgeKind],
        direction: Direction,
        depth: u32,
    ) -> Result<Vec<Neighbor>> {
        Ok(self.db.lock().await.neighbors(node_id, kinds, direction, depth)?)
    }

    // ==================== Catalogue ====================

    pub fn list_languages(&self) -> Vec<LanguageInfo> {
        self.registry
            .list_languages()
            .iter()
            .map(|lang| LanguageInfo {
                id: lang.language_id().to_string(),
                extensions: lang.file_extensions().iter().map(|e| e.to_string()).collect(),
                conversion_targets: frameworks::conversion_targets(lang.language_id())
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
            })
            .collect()
    }

    pub fn list_frameworks(&self, language: &str) -> Result<&'static [Framework]> {
        let frameworks = frameworks::frameworks_for(language);
        if frameworks.is_empty() {
            return Err(CodeShiftError::InvalidRequest(format!(
                "no framework catalogue for '{}'",
                language
            )));
        }
        Ok(frameworks)
    }
}

/// `None` for an absent, empty or `none` framework
fn selected_framework(framework: Option<&str>) -> Option<&str> {
    framework
        .map(str::trim)
        .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("none"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompletionProvider;

    fn service() -> CodeShift {
        let mut config = Config::default();
        config.completion.provider = CompletionProvider::None;
        let service = llm::from_config(&config.completion);
        CodeShift::new(Database::open_in_memory().unwrap(), config, service).unwrap()
    }

    #[test]
    fn test_selected_framework() {
        assert_eq!(selected_framework(Some(" fastapi ")), Some("fastapi"));
        assert_eq!(selected_framework(Some("none")), None);
        assert_eq!(selected_framework(Some("")), None);
        assert_eq!(selected_framework(None), None);
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let shift = service();
        let dir = tempfile::tempdir().unwrap();

        let err = shift
            .register_project("demo", dir.path(), "cobol", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");

        let err = shift
            .register_project("demo", dir.path(), "python", Some("spring"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");

        let err = shift
            .register_project("demo", &dir.path().join("missing"), "python", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");

        let project = shift
            .register_project("demo", dir.path(), "Python", Some("flask"))
            .await
            .unwrap();
        assert_eq!(project.source_language, "python");
        assert_eq!(project.source_framework.as_deref(), Some("flask"));
        assert_eq!(project.status, ProjectStatus::Uploaded);
        assert_eq!(shift.resolve_project("demo").await.unwrap(), project.id);
    }

    #[tokio::test]
    async fn test_unparsed_project_rejects_questions() {
        let shift = service();
        let dir = tempfile::tempdir().unwrap();
        let project = shift
            .register_project("demo", dir.path(), "python", None)
            .await
            .unwrap();

        let err = shift.ask_question(project.id, "what does f do?").await.unwrap_err();
        assert!(matches!(err, CodeShiftError::ProjectNotParsed(id) if id == project.id));

        let err = shift.convert_project(project.id, "go", None).await.unwrap_err();
        assert!(matches!(err, CodeShiftError::ProjectNotParsed(_)));
    }

    #[tokio::test]
    async fn test_empty_root_fails_parse() {
        let shift = service();
        let dir = tempfile::tempdir().unwrap();
        let project = shift
            .register_project("demo", dir.path(), "go", None)
            .await
            .unwrap();

        let err = shift.parse_project(project.id).await.unwrap_err();
        assert_eq!(err.kind(), "parse_error");
        let overview = shift.get_project(project.id).await.unwrap();
        assert_eq!(overview.project.status, ProjectStatus::Failed);
        assert!(overview.project.last_error.is_some());
    }

    #[tokio::test]
    async fn test_failed_reparse_keeps_committed_graph() {
        let shift = service();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    return 1\n").unwrap();
        let project = shift
            .register_project("demo", dir.path(), "python", None)
            .await
            .unwrap();
        shift.parse_project(project.id).await.unwrap();

        std::fs::remove_file(dir.path().join("a.py")).unwrap();
        let err = shift.parse_project(project.id).await.unwrap_err();
        assert_eq!(err.kind(), "parse_error");

        let overview = shift.get_project(project.id).await.unwrap();
        assert_eq!(overview.project.status, ProjectStatus::Parsed);
        assert!(overview.project.last_error.is_some());
        assert_eq!(overview.graph.files, 1);

        let job = shift.convert_project(project.id, "go", None).await.unwrap();
        assert_eq!(job.project_id, project.id);
    }

    #[tokio::test]
    async fn test_convert_during_parse_is_busy() {
        let shift = service();
        let dir = tempfile::tempdir().unwrap();
        let project = shift
            .register_project("demo", dir.path(), "python", None)
            .await
            .unwrap();

        let parse = shift.locks.write(project.id).await;
        let err = shift.convert_project(project.id, "go", None).await.unwrap_err();
        assert!(matches!(err, CodeShiftError::ProjectBusy(id) if id == project.id));
        assert_eq!(err.kind(), "project_busy");
        drop(parse);

        let err = shift.convert_project(project.id, "go", None).await.unwrap_err();
        assert_eq!(err.kind(), "project_not_parsed");
    }

    #[test]
    fn test_catalogue() {
        let shift = service();
        let languages = shift.list_languages();
        let python = languages.iter().find(|l| l.id == "python").unwrap();
        assert!(python.extensions.contains(&".py".to_string()));
        assert!(python.conversion_targets.contains(&"go".to_string()));

        assert!(shift.list_frameworks("java").unwrap().iter().any(|f| f.name == "spring_boot"));
        assert!(shift.list_frameworks("klingon").is_err());
    }
}
