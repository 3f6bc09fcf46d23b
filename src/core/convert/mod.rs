//! Conversion orchestrator
//!
//! A job walks the file units of a graph snapshot in dependency order and
//! converts each through the completion service, handing it the converted
//! output of its finished dependencies. Job and unit state is persisted after
//! every transition, so a job interrupted mid-run resumes from the database.

pub mod assemble;
pub mod order;
pub mod prompt;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::config::{CompletionConfig, ConversionConfig};
use crate::core::error::Result;
use crate::llm::{complete_with_retry, Budget, CompletionService, RetryPolicy};
use crate::storage::models::{
    GeneratedFile, JobRecord, JobState, ProjectRecord, ProjectStatus, UnitRecord, UnitStatus,
};
use crate::storage::Database;

pub use assemble::{write_archive, Manifest};
pub use order::{Plan, Unit};
use prompt::{parse_reply, ConvertedDependency, EntryPointPrompt, PeerSource, UnitPrompt};

/// Graph state a job runs against, taken under the project's read lock
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub project: ProjectRecord,
    pub plan: Plan,
}

impl Snapshot {
    pub fn take(db: &Database, project_id: i64) -> Result<Self> {
        let project = db.get_project(project_id)?;
        let nodes = db.list_nodes(project_id)?;
        let edges = db.list_edges(project_id)?;
        let degraded: HashSet<String> = db
            .list_files(project_id)?
            .into_iter()
            .filter(|f| f.degraded.is_some())
            .map(|f| f.path)
            .collect();
        Ok(Self {
            project,
            plan: Plan::build(&nodes, &edges, &degraded),
        })
    }
}

/// Fresh job record in the `created` state
pub fn new_job(project_id: i64, target_language: &str, target_framework: Option<&str>) -> JobRecord {
    let now = Utc::now();
    JobRecord {
        id: Uuid::new_v4().to_string(),
        project_id,
        target_language: target_language.to_ascii_lowercase(),
        target_framework: target_framework.map(str::to_string),
        state: JobState::Created,
        error: None,
        dependencies: BTreeMap::new(),
        superseded: false,
        created_at: now,
        updated_at: now,
        entry_point: None,
    }
}

/// Outcome of one unit attempt
struct Attempt {
    status: UnitStatus,
    reason: Option<String>,
    output: Option<String>,
    notes: Option<String>,
    dependencies: BTreeMap<String, String>,
}

impl Attempt {
    fn skipped(reason: &str) -> Self {
        Self::ended(UnitStatus::Skipped, reason.to_string())
    }

    fn failed(reason: String) -> Self {
        Self::ended(UnitStatus::Failed, reason)
    }

    fn ended(status: UnitStatus, reason: String) -> Self {
        Self {
            status,
            reason: Some(reason),
            output: None,
            notes: None,
            dependencies: BTreeMap::new(),
        }
    }
}

/// Drives conversion jobs to a terminal state
pub struct Orchestrator {
    db: Arc<Mutex<Database>>,
    service: Arc<dyn CompletionService>,
    policy: RetryPolicy,
    budget: Budget,
    context_budget: usize,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        service: Arc<dyn CompletionService>,
        completion: &CompletionConfig,
        conversion: &ConversionConfig,
    ) -> Self {
        Self {
            db,
            service,
            policy: RetryPolicy::from_config(completion),
            budget: Budget::from_config(completion),
            context_budget: conversion.context_budget_chars,
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run or resume a job. Orchestrator-level errors move the job to
    /// `failed` before they are returned.
    pub async fn run(&self, job_id: &str, snapshot: &Snapshot, cancel: &AtomicBool) -> Result<JobState> {
        match self.drive(job_id, snapshot, cancel).await {
            Ok(state) => Ok(state),
            Err(e) => {
                error!(job_id, error = %e, "Conversion job failed");
                let db = self.db.lock().await;
                if let Err(persist) = db.set_job_state(job_id, JobState::Failed, Some(&e.to_string())) {
                    warn!(job_id, error = %persist, "Could not record job failure");
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, job_id: &str, snapshot: &Snapshot, cancel: &AtomicBool) -> Result<JobState> {
        let (job, mut units) = {
            let db = self.db.lock().await;
            (db.get_job(job_id)?, db.list_units(job_id)?)
        };
        if job.state.is_terminal() {
            return Ok(job.state);
        }
        let mut dependencies = job.dependencies.clone();

        if units.is_empty() {
            self.transition(job_id, JobState::Ordering).await?;
            units = plan_units(job_id, &snapshot.plan);
            dependencies =
                assemble::default_dependencies(&job.target_language, job.target_framework.as_deref());
            let db = self.db.lock().await;
            db.insert_units(&units)?;
            db.set_job_dependencies(job_id, &dependencies)?;
            info!(job_id, units = units.len(), "Conversion order planned");
        } else {
            info!(job_id, state = %job.state, "Resuming conversion job");
        }

        self.transition(job_id, JobState::Converting).await?;
        let mut outputs: HashMap<String, String> = units
            .iter()
            .filter_map(|u| Some((u.source_path.clone(), u.output.clone()?)))
            .collect();

        for i in 0..units.len() {
            if units[i].status.is_terminal() {
                continue;
            }
            if cancel.load(Ordering::SeqCst) {
                return self.cancel_remaining(job_id, &mut units).await;
            }

            let attempt = self.attempt(&job, snapshot, &units[i], &outputs).await;
            let unit = &mut units[i];
            match attempt.status {
                UnitStatus::Converted => debug!(job_id, path = %unit.source_path, "Unit converted"),
                status => warn!(
                    job_id,
                    path = %unit.source_path,
                    status = %status,
                    reason = attempt.reason.as_deref().unwrap_or(""),
                    "Unit not converted"
                ),
            }
            unit.status = attempt.status;
            unit.reason = attempt.reason;
            unit.output = attempt.output;
            unit.notes = match (unit.notes.take(), attempt.notes) {
                (Some(planned), Some(reply)) => Some(format!("{}; {}", planned, reply)),
                (planned, reply) => reply.or(planned),
            };

            let db = self.db.lock().await;
            db.update_unit(unit)?;
            if let Some(output) = &unit.output {
                outputs.insert(unit.source_path.clone(), output.clone());
            }
            if !attempt.dependencies.is_empty() {
                for (name, version) in attempt.dependencies {
                    dependencies.entry(name).or_insert(version);
                }
                db.set_job_dependencies(job_id, &dependencies)?;
            }
        }

        self.transition(job_id, JobState::Assembling).await?;
        {
            let mut taken = HashSet::new();
            let db = self.db.lock().await;
            for unit in units.iter_mut().filter(|u| u.status == UnitStatus::Converted) {
                unit.output_path = Some(assemble::output_path(
                    &unit.source_path,
                    &job.target_language,
                    job.target_framework.as_deref(),
                    &mut taken,
                ));
                db.update_unit(unit)?;
            }
        }

        let outputs: Vec<&str> = units
            .iter()
            .filter(|u| u.status == UnitStatus::Converted)
            .filter_map(|u| u.output_path.as_deref())
            .collect();
        if !outputs.is_empty() && job.entry_point.is_none() {
            let missing = assemble::missing_entry_point(
                &job.target_language,
                job.target_framework.as_deref(),
                &outputs,
            );
            if let Some(path) = missing {
                self.generate_entry_point(&job, &path, &outputs, &mut dependencies).await?;
            }
        }

        let db = self.db.lock().await;
        let converted = units.iter().filter(|u| u.status == UnitStatus::Converted).count();
        let state = if converted > 0 {
            db.set_job_state(job_id, JobState::Completed, None)?;
            db.set_project_status(job.project_id, ProjectStatus::Converted, None)?;
            JobState::Completed
        } else {
            db.set_job_state(job_id, JobState::Failed, Some("no unit was converted"))?;
            JobState::Failed
        };
        info!(job_id, converted, total = units.len(), state = %state, "Conversion job finished");
        Ok(state)
    }

    /// Ask for a startup file. A failed generation leaves the job without one
    /// and only errors from the store abort the job.
    async fn generate_entry_point(
        &self,
        job: &JobRecord,
        path: &str,
        outputs: &[&str],
        dependencies: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        let prompt = EntryPointPrompt {
            target_language: &job.target_language,
            target_framework: job.target_framework.as_deref(),
            path,
            files: outputs,
        }
        .build();
        let reply = complete_with_retry(self.service.as_ref(), &prompt, self.budget, self.policy)
            .await
            .map_err(|e| e.to_string())
            .and_then(|text| parse_reply(&text));

        match reply {
            Ok(generated) => {
                let file = GeneratedFile {
                    path: path.to_string(),
                    content: generated.content,
                };
                let db = self.db.lock().await;
                db.set_job_entry_point(&job.id, &file)?;
                if !generated.dependencies.is_empty() {
                    for (name, version) in generated.dependencies {
                        dependencies.entry(name).or_insert(version);
                    }
                    db.set_job_dependencies(&job.id, dependencies)?;
                }
                info!(job_id = %job.id, path, "Entry point generated");
            }
            Err(reason) => warn!(job_id = %job.id, path, reason = %reason, "Entry point not generated"),
        }
        Ok(())
    }

    async fn transition(&self, job_id: &str, state: JobState) -> Result<()> {
        let db = self.db.lock().await;
        db.set_job_state(job_id, state, None)?;
        Ok(())
    }

    async fn cancel_remaining(&self, job_id: &str, units: &mut [UnitRecord]) -> Result<JobState> {
        let db = self.db.lock().await;
        for unit in units.iter_mut().filter(|u| !u.status.is_terminal()) {
            unit.status = UnitStatus::Skipped;
            unit.reason = Some("job cancelled".to_string());
            db.update_unit(unit)?;
        }
        db.set_job_state(job_id, JobState::Cancelled, None)?;
        info!(job_id, "Conversion job cancelled");
        Ok(JobState::Cancelled)
    }

    async fn attempt(
        &self,
        job: &JobRecord,
        snapshot: &Snapshot,
        unit: &UnitRecord,
        outputs: &HashMap<String, String>,
    ) -> Attempt {
        let plan = &snapshot.plan;
        let Some(idx) = plan.position_of(&unit.source_path) else {
            return Attempt::failed("file is no longer part of the project graph".to_string());
        };
        let source = &plan.units[idx];
        if source.source.trim().is_empty() {
            return Attempt::skipped("empty source file");
        }

        let peers = &plan.cycle_peers[idx];
        let dependencies = plan.deps[idx]
            .iter()
            .filter(|&&d| !peers.contains(&d))
            .filter_map(|&d| {
                let path = plan.units[d].path.as_str();
                outputs.get(path).map(|output| ConvertedDependency {
                    source_path: path,
                    output,
                })
            })
            .collect();
        let cycle_peers = peers
            .iter()
            .map(|&p| PeerSource {
                path: &plan.units[p].path,
                source: &plan.units[p].source,
            })
            .collect();

        let prompt = UnitPrompt {
            source_language: &snapshot.project.source_language,
            source_framework: snapshot.project.source_framework.as_deref(),
            target_language: &job.target_language,
            target_framework: job.target_framework.as_deref(),
            source_path: &source.path,
            source: &source.source,
            dependencies,
            cycle_peers,
            context_budget: self.context_budget,
        }
        .build();

        match complete_with_retry(self.service.as_ref(), &prompt, self.budget, self.policy).await {
            Ok(text) => match parse_reply(&text) {
                Ok(converted) => Attempt {
                    status: UnitStatus::Converted,
                    reason: None,
                    output: Some(converted.content),
                    notes: converted.notes,
                    dependencies: converted.dependencies,
                },
                Err(reason) => Attempt::failed(reason),
            },
            Err(e) if e.is_retryable() => Attempt::failed(format!("{} (retryable)", e)),
            Err(e) => Attempt::failed(e.to_string()),
        }
    }
}

/// Pending unit records in conversion order
fn plan_units(job_id: &str, plan: &Plan) -> Vec<UnitRecord> {
    plan.order
        .iter()
        .enumerate()
        .map(|(position, &idx)| {
            let unit = &plan.units[idx];
            let peers = &plan.cycle_peers[idx];
            let cycle_note = if peers.is_empty() {
                None
            } else {
                let names: Vec<&str> = peers.iter().map(|&p| plan.units[p].path.as_str()).collect();
                Some(format!(
                    "in a dependency cycle with {}; peers were given as pre-conversion source",
                    names.join(", ")
                ))
            };
            UnitRecord {
                job_id: job_id.to_string(),
                position: position as u32,
                node_id: unit.node_id,
                source_path: unit.path.clone(),
                status: UnitStatus::Pending,
                reason: None,
                cycle_note,
                output_path: None,
                output: None,
                notes: if unit.degraded {
                    Some("source did not parse cleanly".to_string())
                } else {
                    None
                },
            }
        })
        .collect()
}
