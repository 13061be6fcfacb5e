use crate::learner::Learner;
use crate::pattern::Pattern;
use agentflow_core::{AgentflowError, AgentflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    patterns: Vec<Pattern>,
}

/// JSON snapshot file for a [`Learner`]. Optional: the learner works
/// in memory without it.
pub struct FilePatternStore {
    path: PathBuf,
}

impl FilePatternStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every pattern in `learner` to the snapshot file.
    pub async fn save(&self, learner: &Learner) -> AgentflowResult<usize> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            patterns: learner.patterns(None),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), count = snapshot.patterns.len(), "Saved pattern snapshot");
        Ok(snapshot.patterns.len())
    }

    /// Replace `learner`'s contents with the snapshot. A missing file loads nothing.
    pub async fn load(&self, learner: &Learner) -> AgentflowResult<usize> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(0);
        }

        let data = tokio::fs::read_to_string(&self.path).await?;
        let snapshot: Snapshot = serde_json::from_str(&data).map_err(|e| {
            AgentflowError::Config(format!(
                "failed to parse pattern snapshot {}: {e}",
                self.path.display()
            ))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AgentflowError::Config(format!(
                "unsupported pattern snapshot version {}",
                snapshot.version
            )));
        }

        let count = snapshot.patterns.len();
        learner.restore(snapshot.patterns);
        info!(path = %self.path.display(), count, "Loaded pattern snapshot");
        Ok(count)
    }
}
