//! Queue facade: the public operation set.
//!
//! Each operation validates its arguments, asks the policy for a filter and
//! update, issues exactly one store call, and shapes the result. The queue
//! keeps no task state of its own and spawns nothing; it is safe to clone
//! and call from any number of tasks, threads, or hosts sharing a store.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info};

use crate::config::QueueSettings;
use crate::error::Result;
use crate::model::{
    AddOptions, Query, RescheduleOptions, ReserveOptions, SearchOptions, Sort, Task, TaskFields,
    TaskId, check_field_name,
};
use crate::policy::{self, Clock, DEFAULT_TIMEOUT_SECS, SystemClock};
use crate::store::{Filter, FindOptions, NewTask, TaskStore};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, record_task, start_task_span, state_of};

/// A priority work queue over one store collection.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    collection: Arc<str>,
    default_timeout: i64,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("collection", &self.collection)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Queue {
    /// Queue over `collection` using the wall clock and a 120 s timeout.
    pub fn new(store: Arc<dyn TaskStore>, collection: impl Into<String>) -> Self {
        let collection: String = collection.into();
        Self {
            store,
            clock: Arc::new(SystemClock),
            collection: Arc::from(collection),
            default_timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Queue configured from settings.
    pub fn with_settings(store: Arc<dyn TaskStore>, settings: &QueueSettings) -> Self {
        Self::new(store, settings.collection.clone()).timeout_secs(settings.timeout_secs)
    }

    /// Replace the clock (tests, simulations).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default for `apply_timeout(None)`.
    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.default_timeout = secs;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn labels(&self) -> Vec<KeyValue> {
        vec![KeyValue::new("collection", self.collection.to_string())]
    }

    /// Insert a new available task. Priority defaults to now.
    pub async fn add_task(&self, fields: TaskFields, options: AddOptions) -> Result<TaskId> {
        let span = start_task_span("add", &self.collection);
        let priority = options.priority.unwrap_or_else(|| self.clock.now());

        async {
            let id = self
                .store
                .insert(&self.collection, NewTask { priority, fields })
                .await?;
            record_task(&span, &id, priority);
            debug!("task added");
            metrics::tasks_added().add(1, &self.labels());
            Ok(id)
        }
        .instrument(span.clone())
        .await
    }

    /// Reserve the lowest-priority available task whose priority is at or
    /// below the horizon (default now). `None` when nothing is eligible.
    pub async fn reserve_task(&self, options: ReserveOptions) -> Result<Option<Task>> {
        let span = start_task_span("reserve", &self.collection);
        let req = policy::reserve(
            self.clock.now(),
            self.clock.now_millis(),
            options.max_priority,
        );

        async {
            let task = self
                .store
                .find_one_and_update(&self.collection, &req.filter, &req.update, &req.sort)
                .await?;

            let mut labels = self.labels();
            match task {
                Some(ref task) => {
                    record_task(&span, &task.id, task.priority);
                    record_state_transition(&span, "available", "reserved");
                    labels.push(KeyValue::new("result", "hit"));
                }
                None => {
                    debug!("no eligible task");
                    labels.push(KeyValue::new("result", "empty"));
                }
            }
            metrics::tasks_reserved().add(1, &labels);
            Ok(task)
        }
        .instrument(span.clone())
        .await
    }

    /// Make a task available again, optionally moving it to a new priority.
    /// A task that no longer exists is ignored.
    pub async fn reschedule_task(&self, task: &Task, options: RescheduleOptions) -> Result<()> {
        let span = start_task_span("reschedule", &self.collection);
        let (filter, update) = policy::reschedule(task, options.priority);
        record_task(&span, &task.id, options.priority.unwrap_or(task.priority));

        async {
            // The stored pre-image, not the caller's copy, says whether a
            // reservation was actually released.
            let Some(before) = self
                .store
                .find_one_and_update(&self.collection, &filter, &update, &Sort::none())
                .await?
            else {
                debug!("reschedule target is gone");
                return Ok(());
            };
            record_state_transition(&span, state_of(&before), "available");
            if before.is_reserved() {
                let mut labels = self.labels();
                labels.push(KeyValue::new("reason", "reschedule"));
                metrics::tasks_released().add(1, &labels);
            }
            Ok(())
        }
        .instrument(span.clone())
        .await
    }

    /// Delete a task. Removing a task twice is a no-op.
    pub async fn remove_task(&self, task: &Task) -> Result<()> {
        self.remove_id(task.id).await
    }

    /// Delete a task by identity alone. A missing task is a no-op.
    pub async fn remove_id(&self, id: TaskId) -> Result<()> {
        let span = start_task_span("remove", &self.collection);

        async {
            let removed = self
                .store
                .delete_one(&self.collection, &policy::remove(id))
                .await?;
            match removed {
                Some(task) => {
                    record_task(&span, &task.id, task.priority);
                    record_state_transition(&span, state_of(&task), "removed");
                    metrics::tasks_removed().add(1, &self.labels());
                }
                None => debug!(task.id = %id, "remove target is gone"),
            }
            Ok(())
        }
        .instrument(span.clone())
        .await
    }

    /// Release every reservation older than `secs` (default from settings,
    /// normally 120). Idempotent; never touches priority. Returns how many
    /// tasks were released.
    pub async fn apply_timeout(&self, secs: Option<i64>) -> Result<u64> {
        let span = start_task_span("timeout", &self.collection);
        let secs = secs.unwrap_or(self.default_timeout);
        let (filter, update) = policy::timeout(self.clock.now_millis(), secs)?;

        async {
            let released = self
                .store
                .update_many(&self.collection, &filter, &update)
                .await?;
            if released > 0 {
                info!(released, timeout_secs = secs, "released stale reservations");
                let mut labels = self.labels();
                labels.push(KeyValue::new("reason", "timeout"));
                metrics::tasks_released().add(released, &labels);
            }
            Ok(released)
        }
        .instrument(span)
        .await
    }

    /// Find tasks whose caller fields equal every entry of `query`.
    pub async fn search(&self, query: Query, options: SearchOptions) -> Result<Vec<Task>> {
        options.sort.validate()?;
        if let Some(ref names) = options.fields {
            for name in names {
                check_field_name(name)?;
            }
        }

        let mut filter = policy::visibility(options.reserved);
        if !query.is_empty() {
            filter.query = Some(query);
        }
        let find = FindOptions {
            sort: options.sort,
            limit: options.limit,
            skip: options.skip,
            fields: options.fields,
        };

        let span = start_task_span("search", &self.collection);
        self.store
            .find(&self.collection, &filter, &find)
            .instrument(span)
            .await
    }

    /// Current state of `task`, or `None` if it was removed.
    pub async fn peek(&self, task: &Task) -> Result<Option<Task>> {
        Ok(self.peek_all(task).await?.into_iter().next())
    }

    /// Sequence form of [`Queue::peek`]: zero or one element.
    pub async fn peek_all(&self, task: &Task) -> Result<Vec<Task>> {
        self.peek_id(task.id).await
    }

    /// Look a task up by identity alone.
    pub async fn peek_id(&self, id: TaskId) -> Result<Vec<Task>> {
        let span = start_task_span("peek", &self.collection);
        let options = FindOptions {
            limit: Some(1),
            ..FindOptions::default()
        };
        self.store
            .find(&self.collection, &Filter::id(id), &options)
            .instrument(span)
            .await
    }

    /// Total number of tasks.
    pub async fn size(&self) -> Result<u64> {
        self.store.count(&self.collection, &Filter::all()).await
    }

    /// Number of available (unreserved) tasks, including ones scheduled
    /// for the future.
    pub async fn waiting(&self) -> Result<u64> {
        self.store
            .count(&self.collection, &policy::visibility(Some(false)))
            .await
    }

    /// Number of reserved tasks.
    pub async fn reserved(&self) -> Result<u64> {
        self.store
            .count(&self.collection, &policy::visibility(Some(true)))
            .await
    }
}
