//! Per-project reader/writer locks
//!
//! A parse takes the write side for its whole run. Conversion and question
//! answering take the read side only while they snapshot the graph, so a
//! reparse never interleaves with a snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<i64, Arc<RwLock<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, project_id: i64) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(project_id).or_default())
    }

    pub async fn write(&self, project_id: i64) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(project_id).write_owned().await
    }

    pub async fn read(&self, project_id: i64) -> OwnedRwLockReadGuard<()> {
        self.lock_for(project_id).read_owned().await
    }

    /// Read guard, or `None` while a parse holds the project
    pub fn try_read(&self, project_id: i64) -> Option<OwnedRwLockReadGuard<()>> {
        self.lock_for(project_id).try_read_owned().ok()
    }

    pub fn forget(&self, project_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&project_id);
    }
}
