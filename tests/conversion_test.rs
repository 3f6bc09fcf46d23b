//! Integration tests for dependency-ordered conversion jobs

mod common;

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use codeshift::core::config::Config;
use codeshift::core::convert::{new_job, Snapshot};
use codeshift::llm::{Budget, CompletionError, CompletionService, Prompt};
use codeshift::storage::models::{JobState, ProjectStatus, UnitRecord, UnitStatus};
use codeshift::{CodeShift, CodeShiftError, Database};

use common::{fast_policy, parsed_project, service_with, stage, Scripted};

fn read_zip(bytes: Vec<u8>) -> zip::ZipArchive<Cursor<Vec<u8>>> {
    zip::ZipArchive::new(Cursor::new(bytes)).unwrap()
}

fn zip_entry(archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut text = String::new();
    archive.by_name(name).unwrap().read_to_string(&mut text).unwrap();
    text
}

#[tokio::test]
async fn test_dependencies_convert_first() {
    let dir = stage(&[
        ("a.py", "from b import g\n\ndef f():\n    return g()\n"),
        ("b.py", "from c import h\n\ndef g():\n    return h()\n"),
        ("c.py", "def h():\n    return 1\n"),
        ("d.py", "def lonely():\n    return 4\n"),
    ]);
    let completion = Arc::new(Scripted::new());
    let shift = service_with(completion.clone());
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "go", None).await.unwrap();
    assert_eq!(job.state, JobState::Created);
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);

    assert_eq!(completion.converted_paths(), vec!["c.py", "b.py", "a.py", "d.py"]);
    let b_prompt = completion.prompt_for("b.py");
    assert!(b_prompt.contains("--- c.py ---\npackage main\n\n// converted from c.py"));
    let a_prompt = completion.prompt_for("a.py");
    assert!(a_prompt.contains("// converted from b.py"));
    assert!(!a_prompt.contains("// converted from c.py"));
    assert!(a_prompt.starts_with("Convert from python to go this python file."));

    let result = shift.get_conversion_result(&job.id).await.unwrap();
    assert_eq!(result.manifest.converted, 4);
    assert_eq!(result.manifest.dependency_file, "go.mod");
    assert_eq!(result.job.dependencies["github.com/example/lib"], "v1.2.0");
    let overview = shift.get_project(project_id).await.unwrap();
    assert_eq!(overview.project.status, ProjectStatus::Converted);

    let mut archive = read_zip(shift.download_conversion_output(&job.id).await.unwrap());
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["CONVERSION_NOTES.md", "a.go", "b.go", "c.go", "d.go", "go.mod", "main.go", "manifest.json"]
    );
    assert_eq!(zip_entry(&mut archive, "main.go"), "// entry point main.go\n");
    assert_eq!(zip_entry(&mut archive, "c.go"), "package main\n\n// converted from c.py\n");
    assert!(zip_entry(&mut archive, "go.mod").contains("github.com/example/lib v1.2.0"));
    let manifest: serde_json::Value = serde_json::from_str(&zip_entry(&mut archive, "manifest.json")).unwrap();
    assert_eq!(manifest["state"], "completed");
    assert_eq!(manifest["entry_point"], "main.go");
    assert_eq!(manifest["files"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_framework_layout_and_generated_entry_point() {
    let dir = stage(&[
        ("service/users.py", "def find_user():\n    return 1\n"),
        ("app.py", "from service.users import find_user\n\ndef run():\n    return find_user()\n"),
    ]);
    let completion = Arc::new(Scripted::new());
    let shift = service_with(completion.clone());
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "java", Some("spring_boot")).await.unwrap();
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);

    let units = shift.list_units(&job.id).await.unwrap();
    let mut outputs: Vec<&str> = units.iter().filter_map(|u| u.output_path.as_deref()).collect();
    outputs.sort();
    assert_eq!(
        outputs,
        vec![
            "src/main/java/com/example/app.java",
            "src/main/java/com/example/service/users.java",
        ]
    );

    let entry = job.entry_point.clone().unwrap();
    assert_eq!(entry.path, "src/main/java/Main.java");
    let prompts = completion.prompts.lock().unwrap().clone();
    let entry_prompt = prompts.last().unwrap();
    assert!(entry_prompt.contains("using the spring_boot framework"));
    assert!(entry_prompt.contains("- src/main/java/com/example/service/users.java"));

    let mut archive = read_zip(shift.download_conversion_output(&job.id).await.unwrap());
    assert_eq!(
        zip_entry(&mut archive, "src/main/java/Main.java"),
        "// entry point src/main/java/Main.java\n"
    );
    let manifest: serde_json::Value = serde_json::from_str(&zip_entry(&mut archive, "manifest.json")).unwrap();
    assert_eq!(manifest["entry_point"], "src/main/java/Main.java");
}

#[tokio::test]
async fn test_converted_entry_point_is_kept() {
    let dir = stage(&[
        ("main.py", "from util import helper\n\ndef run():\n    return helper()\n"),
        ("util.py", "def helper():\n    return 1\n"),
    ]);
    let completion = Arc::new(Scripted::new());
    let shift = service_with(completion.clone());
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "go", None).await.unwrap();
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.entry_point.is_none());
    assert_eq!(completion.prompts.lock().unwrap().len(), 2);
    assert_eq!(completion.converted_paths(), vec!["util.py", "main.py"]);
}

#[tokio::test]
async fn test_entry_point_failure_keeps_job() {
    let dir = stage(&[("a.py", "def f():\n    return 1\n")]);
    let shift = service_with(Arc::new(Scripted::failing(&["main.go"])));
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "go", None).await.unwrap();
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.entry_point.is_none());

    let archive = read_zip(shift.download_conversion_output(&job.id).await.unwrap());
    assert!(archive.file_names().all(|name| name != "main.go"));
}

#[tokio::test]
async fn test_cycle_members_get_peer_sources() {
    let dir = stage(&[
        ("x.py", "from y import b\n\ndef a():\n    return b()\n"),
        ("y.py", "from x import a\n\ndef b():\n    return a()\n"),
    ]);
    let completion = Arc::new(Scripted::new());
    let shift = service_with(completion.clone());
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "go", None).await.unwrap();
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);

    let units = shift.list_units(&job.id).await.unwrap();
    assert_eq!(units.len(), 2);
    for unit in &units {
        assert!(unit.status.is_terminal());
        let note = unit.cycle_note.as_deref().unwrap();
        let peer = if unit.source_path == "x.py" { "y.py" } else { "x.py" };
        assert!(note.contains(peer), "{} lacks {}", note, peer);
    }

    let x_prompt = completion.prompt_for("x.py");
    assert!(x_prompt.contains("dependency cycle"));
    assert!(x_prompt.contains("--- y.py ---\nfrom x import a"));
    assert!(!x_prompt.contains("// converted from y.py"));
}

#[tokio::test]
async fn test_unit_failures_are_contained() {
    let dir = stage(&[
        ("a.py", "def f():\n    return 1\n"),
        ("b.py", "def g():\n    return 2\n"),
        ("broken.py", "def broken(:\n    pass\n"),
    ]);
    let completion = Arc::new(Scripted::failing(&["b.py"]));
    let shift = service_with(completion.clone());
    let project = shift
        .register_project("demo", dir.path(), "python", None)
        .await
        .unwrap();
    let parsed = shift.parse_project(project.id).await.unwrap();
    assert_eq!(parsed.stats.degraded_files, 1);

    let job = shift.convert_project(project.id, "go", None).await.unwrap();
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(completion.converted_paths().len(), 3);

    let units = shift.list_units(&job.id).await.unwrap();
    let by_path = |path: &str| units.iter().find(|u| u.source_path == path).unwrap();
    assert_eq!(by_path("a.py").status, UnitStatus::Converted);
    assert_eq!(by_path("b.py").status, UnitStatus::Failed);
    assert!(by_path("b.py").reason.as_deref().unwrap().contains("scripted failure"));
    assert!(by_path("b.py").output_path.is_none());

    let broken = by_path("broken.py");
    assert_eq!(broken.status, UnitStatus::Converted);
    assert!(broken.notes.as_deref().unwrap().contains("did not parse cleanly"));

    let result = shift.get_conversion_result(&job.id).await.unwrap();
    assert_eq!((result.manifest.converted, result.manifest.failed), (2, 1));
}

#[tokio::test]
async fn test_job_without_conversions_fails() {
    let dir = stage(&[("a.py", "def f():\n    return 1\n")]);
    let shift = service_with(Arc::new(Scripted::failing(&["a.py"])));
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "java", Some("spring_boot")).await.unwrap();
    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("no unit was converted"));
    assert!(job.dependencies.contains_key("spring-boot-starter-web"));

    let err = shift.download_conversion_output(&job.id).await.unwrap_err();
    assert!(matches!(err, CodeShiftError::JobNotComplete(ref id) if *id == job.id));
}

#[tokio::test]
async fn test_invalid_conversion_requests() {
    let dir = stage(&[("a.py", "def f():\n    return 1\n")]);
    let shift = service_with(Arc::new(Scripted::new()));
    let project_id = parsed_project(&shift, &dir, "python").await;

    let err = shift.convert_project(project_id, "cobol", None).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    let err = shift.convert_project(project_id, "go", Some("django")).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    let err = shift.convert_project(999, "go", None).await.unwrap_err();
    assert!(matches!(err, CodeShiftError::ProjectNotFound(999)));
    let err = shift.get_conversion_result("missing").await.unwrap_err();
    assert_eq!(err.kind(), "job_not_found");
}

/// Holds its first call until released
#[derive(Default)]
struct Gate {
    started: Notify,
    release: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionService for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn complete(&self, _prompt: &Prompt, _budget: Budget) -> Result<String, CompletionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(r#"{"content": "package main\n"}"#.to_string())
    }
}

#[tokio::test]
async fn test_cancel_stops_before_next_unit() {
    let dir = stage(&[
        ("a.py", "def f():\n    return 1\n"),
        ("b.py", "def g():\n    return 2\n"),
        ("c.py", "def h():\n    return 3\n"),
    ]);
    let gate = Arc::new(Gate::default());
    let shift = service_with(gate.clone());
    let project_id = parsed_project(&shift, &dir, "python").await;

    let job = shift.convert_project(project_id, "go", None).await.unwrap();
    gate.started.notified().await;
    let pending = shift.cancel_conversion(&job.id).await.unwrap();
    assert!(!pending.state.is_terminal());
    gate.release.notify_one();

    let job = shift.wait_for_job(&job.id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

    let units = shift.list_units(&job.id).await.unwrap();
    assert_eq!(units[0].status, UnitStatus::Converted);
    for unit in &units[1..] {
        assert_eq!(unit.status, UnitStatus::Skipped);
        assert_eq!(unit.reason.as_deref(), Some("job cancelled"));
    }

    // cancelling a finished job changes nothing
    let again = shift.cancel_conversion(&job.id).await.unwrap();
    assert_eq!(again.state, JobState::Cancelled);
}

#[tokio::test]
async fn test_interrupted_job_resumes() {
    let sources = stage(&[
        ("a.py", "def f():\n    return 1\n"),
        ("b.py", "def g():\n    return 2\n"),
        ("c.py", "def h():\n    return 3\n"),
    ]);
    let db_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.path = db_dir.path().join("codeshift.db");

    let first = CodeShift::new(
        Database::open(&config.database.path).unwrap(),
        config.clone(),
        Arc::new(Scripted::new()),
    )
    .unwrap();
    let project_id = parsed_project(&first, &sources, "python").await;
    drop(first);

    // a job that stopped after converting its first unit
    let job = {
        let db = Database::open(&config.database.path).unwrap();
        let snapshot = Snapshot::take(&db, project_id).unwrap();
        let job = new_job(project_id, "go", None);
        db.insert_job(&job).unwrap();
        let units: Vec<UnitRecord> = snapshot
            .plan
            .order
            .iter()
            .enumerate()
            .map(|(position, &idx)| {
                let unit = &snapshot.plan.units[idx];
                let done = position == 0;
                UnitRecord {
                    job_id: job.id.clone(),
                    position: position as u32,
                    node_id: unit.node_id,
                    source_path: unit.path.clone(),
                    status: if done { UnitStatus::Converted } else { UnitStatus::Pending },
                    reason: None,
                    cycle_note: None,
                    output_path: None,
                    output: done.then(|| "package main\n".to_string()),
                    notes: None,
                }
            })
            .collect();
        db.insert_units(&units).unwrap();
        db.set_job_state(&job.id, JobState::Converting, None).unwrap();
        job
    };

    let completion = Arc::new(Scripted::new());
    let second = CodeShift::new(
        Database::open(&config.database.path).unwrap(),
        config,
        completion.clone(),
    )
    .unwrap()
    .with_retry_policy(fast_policy());
    assert_eq!(second.resume_incomplete_jobs().await.unwrap(), 1);

    let finished = second.wait_for_job(&job.id).await.unwrap();
    assert_eq!(finished.state, JobState::Completed);
    assert_eq!(completion.converted_paths(), vec!["b.py", "c.py"]);

    let units = second.list_units(&job.id).await.unwrap();
    assert_eq!(units[0].output_path.as_deref(), Some("a.go"));
    assert!(units.iter().all(|u| u.status == UnitStatus::Converted));
}
