//! Problem definitions loaded from `<problems_dir>/<id>.json`.
//!
//! Parsed problems are cached read-only behind `Arc` so concurrent gradings
//! share them without copying.

use crate::error::GraderError;
use judgemaster_common::problem::{is_valid_problem_id, parse_problem};
use judgemaster_common::types::Problem;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ProblemStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<Problem>>>,
}

impl ProblemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch a problem by id, reading it from disk on first use.
    pub async fn get(&self, id: &str) -> Result<Arc<Problem>, GraderError> {
        if !is_valid_problem_id(id) {
            return Err(GraderError::ProblemNotFound(id.to_string()));
        }

        if let Some(problem) = self.cache.read().await.get(id) {
            return Ok(problem.clone());
        }

        let path = self.root.join(format!("{}.json", id));
        let problem = Arc::new(Self::load_file(&path).await?);
        if problem.id != id {
            return Err(GraderError::InvalidProblem(format!(
                "{} declares id '{}'",
                path.display(),
                problem.id
            )));
        }
        debug!(problem_id = %id, test_count = problem.test_cases.len(), "Problem loaded");

        let mut cache = self.cache.write().await;
        Ok(cache.entry(id.to_string()).or_insert(problem).clone())
    }

    /// Drop a cached problem so the next `get` rereads it.
    pub async fn invalidate(&self, id: &str) {
        if self.cache.write().await.remove(id).is_some() {
            info!(problem_id = %id, "Problem cache entry invalidated");
        }
    }

    /// Ids of every `*.json` file under the root, sorted.
    pub async fn list_ids(&self) -> Result<Vec<String>, GraderError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(GraderError::Artifact)?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(GraderError::Artifact)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_problem_id(stem) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Read and validate a standalone problem file. The file stem is the id
    /// unless the document names itself.
    pub async fn load_file(path: &Path) -> Result<Problem, GraderError> {
        let fallback_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(GraderError::ProblemNotFound(fallback_id));
            }
            Err(e) => {
                return Err(GraderError::InvalidProblem(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        parse_problem(&fallback_id, &content)
            .map_err(|e| GraderError::InvalidProblem(format!("{}: {}", path.display(), e)))
    }
}
