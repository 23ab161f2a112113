//! # List Queries
//!
//! `FlowInstanceQuery` is what a caller asks for ("created by me",
//! "approvable by me", ...). The service resolves it against the caller's
//! identity into a `FlowInstanceFilter` the store can evaluate directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskType;
use crate::state_machine::states::FlowStatus;

/// Caller-facing list parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowInstanceQuery {
    pub created_by_current_user: bool,
    pub approve_by_current_user: bool,
    /// Lift the creator/approver restriction (still organization-scoped)
    pub contains_all: bool,
    pub flow_instance_id: Option<i64>,
    pub statuses: Vec<FlowStatus>,
    pub task_type: Option<TaskType>,
    pub parent_instance_id: Option<i64>,
    pub project_ids: Vec<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// Store-level filter; every populated field is ANDed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowInstanceFilter {
    pub organization_id: Option<i64>,
    /// Restrict to these ids; `Some(vec![])` matches nothing
    pub ids: Option<Vec<i64>>,
    pub creator_id: Option<i64>,
    pub statuses: Vec<FlowStatus>,
    pub task_type: Option<TaskType>,
    pub parent_instance_id: Option<i64>,
    pub project_ids: Vec<i64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Represents pagination parameters for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

impl Pagination {
    /// Create pagination with page number (1-indexed) and per-page count
    pub fn new(page: u32, per_page: u32) -> Self {
        let offset = if page > 0 {
            Some((page - 1) * per_page)
        } else {
            None
        };
        Self {
            limit: Some(per_page),
            offset,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            limit: None,
            offset: None,
        }
    }

    /// Get current page number (1-indexed)
    pub fn current_page(&self) -> u32 {
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) if limit > 0 => (offset / limit) + 1,
            _ => 1,
        }
    }

    /// Slice an already ordered collection
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0) as usize;
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }
}

/// One page of results together with the unpaged total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
}

impl<T> Page<T> {
    pub fn paginate(all: Vec<T>, pagination: &Pagination) -> Self {
        let total = all.len();
        Self {
            items: pagination.apply(all),
            total,
            page: pagination.current_page(),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
        }
    }
}
