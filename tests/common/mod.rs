//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use codeshift::core::config::Config;
use codeshift::llm::{Budget, CompletionError, CompletionService, Prompt, RetryPolicy};
use codeshift::{CodeShift, Database};

/// Write `files` under a fresh temporary directory
pub fn stage(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, text) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, text).unwrap();
    }
    dir
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(5),
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    }
}

/// Completion service answering from a script instead of a model. Conversion
/// and startup file prompts get a JSON reply naming the file; anything else
/// gets a fixed answer.
#[derive(Default)]
pub struct Scripted {
    /// Source or entry point paths whose generation fails permanently
    pub failing: HashSet<String>,
    /// User messages received, in call order
    pub prompts: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(paths: &[&str]) -> Self {
        Self {
            failing: paths.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Source path of every conversion prompt received, in call order
    pub fn converted_paths(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| source_path(p))
            .collect()
    }

    /// The conversion prompt sent for `path`
    pub fn prompt_for(&self, path: &str) -> String {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .find(|p| source_path(p).as_deref() == Some(path))
            .cloned()
            .unwrap_or_else(|| panic!("no prompt for {}", path))
    }
}

fn source_path(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Original file: "))
        .map(str::to_string)
}

fn entry_point(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Entry point: "))
        .map(str::to_string)
}

#[async_trait]
impl CompletionService for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt, _budget: Budget) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(prompt.user.clone());
        if let Some(entry) = entry_point(&prompt.user) {
            if self.failing.contains(&entry) {
                return Err(CompletionError::InvalidResponse(format!("scripted failure for {}", entry)));
            }
            return Ok(json!({
                "filename": entry,
                "content": format!("// entry point {}\n", entry),
                "dependencies": {},
            })
            .to_string());
        }
        let Some(path) = source_path(&prompt.user) else {
            return Ok("f returns the result of g.".to_string());
        };
        if self.failing.contains(&path) {
            return Err(CompletionError::InvalidResponse(format!("scripted failure for {}", path)));
        }
        Ok(json!({
            "filename": path,
            "content": format!("package main\n\n// converted from {}\n", path),
            "dependencies": {"github.com/example/lib": "v1.2.0"},
            "notes": "scripted"
        })
        .to_string())
    }
}

/// Service over an in-memory database
pub fn service_with(completion: Arc<dyn CompletionService>) -> CodeShift {
    CodeShift::new(Database::open_in_memory().unwrap(), Config::default(), completion)
        .unwrap()
        .with_retry_policy(fast_policy())
}

/// Register and parse a project rooted at `dir`
pub async fn parsed_project(shift: &CodeShift, dir: &TempDir, language: &str) -> i64 {
    let project = shift
        .register_project("demo", dir.path(), language, None)
        .await
        .unwrap();
    shift.parse_project(project.id).await.unwrap();
    project.id
}
