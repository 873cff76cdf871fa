use serde::{Deserialize, Serialize};

use crate::conflict::resolution::ConflictPolicy;

/// Settings of a [`DatabaseMapping`](crate::mapping::DatabaseMapping).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Resolution policy used by `fetch_all`, `refresh_session` and commit.
    pub conflict_policy: ConflictPolicy,
    /// Refresh before committing when someone else committed in the meantime.
    pub refresh_before_commit: bool,
    /// Fetch the tables a table references before fetching the table itself.
    pub fetch_referenced_types: bool,
    /// User name recorded with commits.
    pub user: String,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::KeepInMemory,
            refresh_before_commit: true,
            fetch_referenced_types: true,
            user: "spinedb".to_string(),
        }
    }
}

impl MappingConfig {
    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }

    pub fn with_refresh_before_commit(mut self, refresh_before_commit: bool) -> Self {
        self.refresh_before_commit = refresh_before_commit;
        self
    }

    pub fn with_fetch_referenced_types(mut self, fetch_referenced_types: bool) -> Self {
        self.fetch_referenced_types = fetch_referenced_types;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}
