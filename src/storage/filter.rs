//! Typed repository filters
//!
//! A filter is a fixed set of optional fields. The SQL store projects it
//! with [`RepositoryFilter::to_query`]; the in-memory store evaluates it
//! with [`RepositoryFilter::matches`]. Both must agree.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::models::{Repository, SourcePlatform};
use crate::status::RepositoryStatus;

/// Filter over the repositories table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFilter {
    /// Members of one batch
    pub batch_id: Option<i64>,

    /// Source organization (case-insensitive)
    pub organization: Option<String>,

    /// Source platform
    pub source: Option<SourcePlatform>,

    /// Exact granular status
    pub status: Option<RepositoryStatus>,

    /// Only repositories not assigned to any batch
    #[serde(default)]
    pub unassigned_only: bool,
}

/// SQL projection of a filter: a `WHERE` fragment plus positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub where_clause: String,
    pub params: Vec<Value>,
}

impl RepositoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_batch(batch_id: i64) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Default::default()
        }
    }

    pub fn for_organization(organization: impl Into<String>) -> Self {
        Self {
            organization: Some(organization.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RepositoryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Project into a SQL `WHERE` clause.
    ///
    /// Returns `"1 = 1"` for an empty filter so callers can always append it.
    pub fn to_query(&self) -> Query {
        let mut conditions: Vec<&'static str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(batch_id) = self.batch_id {
            conditions.push("batch_id = ?");
            params.push(Value::Integer(batch_id));
        }
        if let Some(organization) = &self.organization {
            conditions.push("LOWER(organization) = LOWER(?)");
            params.push(Value::Text(organization.clone()));
        }
        if let Some(source) = self.source {
            conditions.push("source = ?");
            params.push(Value::Text(source.as_str().to_string()));
        }
        if let Some(status) = self.status {
            conditions.push("status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        if self.unassigned_only {
            conditions.push("batch_id IS NULL");
        }

        let where_clause = if conditions.is_empty() {
            "1 = 1".to_string()
        } else {
            conditions.join(" AND ")
        };

        Query {
            where_clause,
            params,
        }
    }

    /// Evaluate the filter against one repository
    pub fn matches(&self, repo: &Repository) -> bool {
        if let Some(batch_id) = self.batch_id {
            if repo.batch_id != Some(batch_id) {
                return false;
            }
        }
        if let Some(organization) = &self.organization {
            if !repo.organization.eq_ignore_ascii_case(organization) {
                return false;
            }
        }
        if let Some(source) = self.source {
            if repo.source != source {
                return false;
            }
        }
        if let Some(status) = self.status {
            if repo.status != status {
                return false;
            }
        }
        if self.unassigned_only && repo.batch_id.is_some() {
            return false;
        }
        true
    }
}
