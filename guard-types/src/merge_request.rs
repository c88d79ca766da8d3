use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a merge/pull request as reported by the GitOps host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequestInfo {
    pub id: u64,
    pub iid: u64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub state: String,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeRequestInfo {
    /// Placeholder returned by dry-run paths: `id = 0`, `web_url = ""`.
    pub fn dry_run(
        title: impl Into<String>,
        description: impl Into<String>,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        draft: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            iid: 0,
            title: title.into(),
            description: description.into(),
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            state: if draft { "draft".to_string() } else { "opened".to_string() },
            web_url: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
