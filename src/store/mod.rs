//! Task store adapter: the document-store capabilities the queue needs.
//!
//! Implementations own storage and atomicity. The queue layer only ever
//! asks for one of these operations per call and never combines a read
//! with a later write.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Query, Sort, Task, TaskFields, TaskId};

pub use memory::MemoryStore;

/// A document to insert. The store assigns the identity.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub priority: i64,
    pub fields: TaskFields,
}

/// Conjunction of predicates over a task document. `Filter::default()`
/// matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub id: Option<TaskId>,
    /// priority <= this value.
    pub max_priority: Option<i64>,
    /// `Some(true)`: reserved-at present. `Some(false)`: absent.
    pub reserved: Option<bool>,
    /// reserved-at < this value. Implies reserved-at present.
    pub reserved_before: Option<i64>,
    /// Caller-field equality.
    pub query: Option<Query>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn id(id: TaskId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Evaluate against a document. Used by in-process stores.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(id) = self.id
            && task.id != id
        {
            return false;
        }
        if let Some(max) = self.max_priority
            && task.priority > max
        {
            return false;
        }
        if let Some(reserved) = self.reserved
            && task.is_reserved() != reserved
        {
            return false;
        }
        if let Some(cutoff) = self.reserved_before {
            match task.reserved_at {
                Some(at) if at < cutoff => {}
                _ => return false,
            }
        }
        if let Some(ref query) = self.query
            && !task.fields.matches(query)
        {
            return false;
        }
        true
    }
}

/// Mutation applied by `find_one_and_update` / `update_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Set reserved-at.
    Reserve { at: i64 },
    /// Clear reserved-at, optionally overwriting priority.
    Release { priority: Option<i64> },
}

impl Update {
    /// Apply to a document in place. Used by in-process stores.
    pub fn apply(&self, task: &mut Task) {
        match *self {
            Update::Reserve { at } => task.reserved_at = Some(at),
            Update::Release { priority } => {
                task.reserved_at = None;
                if let Some(p) = priority {
                    task.priority = p;
                }
            }
        }
    }
}

/// Read-path options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Sort,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    /// Caller fields to keep; metadata is always returned.
    pub fields: Option<Vec<String>>,
}

/// Document store operations backing a queue.
///
/// `collection` namespaces tasks so several queues can share one store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Append a document and return its new identity.
    async fn insert(&self, collection: &str, task: NewTask) -> Result<TaskId>;

    /// Atomically pick the first document matching `filter` in `sort`
    /// order, apply `update`, and return the document as it was before the
    /// update. Two concurrent callers can never both receive the same
    /// document when `update` makes it stop matching `filter`.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: &Sort,
    ) -> Result<Option<Task>>;

    /// Apply `update` to every matching document. Atomic per document only.
    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Task>>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Delete the first matching document and return it as it was stored.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<Option<Task>>;
}
