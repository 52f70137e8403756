//! PostgreSQL task store.
//!
//! All queues share the `tasks` table, separated by `collection`. The
//! atomic find-and-update is one statement: a CTE picks the first matching
//! row with `FOR UPDATE SKIP LOCKED` (plain `FOR UPDATE` by identity), the
//! outer `UPDATE` modifies it, and `RETURNING` reads the CTE's columns, i.e.
//! the row as it was before.

use std::time::Instant;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Direction, Sort, SortKey, Task, TaskFields, TaskId};
use crate::store::{Filter, FindOptions, NewTask, TaskStore, Update};
use crate::telemetry::metrics;

const COLUMNS: &str = "id, priority, reserved_at, fields";

#[async_trait]
impl TaskStore for super::Db {
    async fn insert(&self, collection: &str, task: NewTask) -> Result<TaskId> {
        let started = Instant::now();
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO tasks (id, collection, priority, fields) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(collection)
            .bind(task.priority)
            .bind(task.fields.into_value())
            .execute(self.pool())
            .await?;
        observe("insert", started);
        Ok(TaskId(id))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: &Sort,
    ) -> Result<Option<Task>> {
        let started = Instant::now();
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("WITH picked AS (SELECT {COLUMNS} FROM tasks"));
        push_filter(&mut qb, collection, filter);
        push_sort(&mut qb, sort);
        // A scan skips rows other callers hold; a lookup by identity waits
        // for them so the update still lands.
        qb.push(if filter.id.is_some() {
            " LIMIT 1 FOR UPDATE) UPDATE tasks SET "
        } else {
            " LIMIT 1 FOR UPDATE SKIP LOCKED) UPDATE tasks SET "
        });
        push_update(&mut qb, update);
        qb.push(
            " FROM picked WHERE tasks.id = picked.id \
             RETURNING picked.id, picked.priority, picked.reserved_at, picked.fields",
        );

        let row: Option<TaskRow> = qb.build_query_as().fetch_optional(self.pool()).await?;
        observe("find_one_and_update", started);
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64> {
        let started = Instant::now();
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE tasks SET ");
        push_update(&mut qb, update);
        push_filter(&mut qb, collection, filter);

        let affected = qb.build().execute(self.pool()).await?.rows_affected();
        observe("update_many", started);
        Ok(affected)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Task>> {
        let started = Instant::now();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, priority, reserved_at, ");
        match options.fields {
            // Projection keeps only the listed top-level keys.
            Some(ref names) => {
                qb.push(
                    "(SELECT COALESCE(jsonb_object_agg(key, value), '{}'::jsonb) \
                     FROM jsonb_each(fields) WHERE key = ANY(",
                )
                .push_bind(names.clone())
                .push(")) AS fields");
            }
            None => {
                qb.push("fields");
            }
        }
        qb.push(" FROM tasks");
        push_filter(&mut qb, collection, filter);
        if options.sort.is_empty() {
            // No defined order; keep LIMIT/OFFSET paging stable between calls.
            qb.push(" ORDER BY priority ASC, id ASC");
        } else {
            push_sort(&mut qb, &options.sort);
        }
        if let Some(limit) = options.limit {
            qb.push(" LIMIT ").push_bind(clamp(limit));
        }
        if let Some(skip) = options.skip {
            qb.push(" OFFSET ").push_bind(clamp(skip));
        }

        let rows: Vec<TaskRow> = qb.build_query_as().fetch_all(self.pool()).await?;
        observe("find", started);
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let started = Instant::now();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        push_filter(&mut qb, collection, filter);

        let (count,): (i64,) = qb.build_query_as().fetch_one(self.pool()).await?;
        observe("count", started);
        Ok(count as u64)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<Option<Task>> {
        let started = Instant::now();
        let mut qb =
            QueryBuilder::<Postgres>::new("DELETE FROM tasks WHERE id IN (SELECT id FROM tasks");
        push_filter(&mut qb, collection, filter);
        qb.push(format!(" LIMIT 1) RETURNING {COLUMNS}"));

        let row: Option<TaskRow> = qb.build_query_as().fetch_optional(self.pool()).await?;
        observe("delete_one", started);
        row.map(TaskRow::try_into_task).transpose()
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, collection: &str, filter: &Filter) {
    qb.push(" WHERE collection = ").push_bind(collection.to_string());
    if let Some(id) = filter.id {
        qb.push(" AND id = ").push_bind(id.0);
    }
    if let Some(max) = filter.max_priority {
        qb.push(" AND priority <= ").push_bind(max);
    }
    match filter.reserved {
        Some(true) => {
            qb.push(" AND reserved_at IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND reserved_at IS NULL");
        }
        None => {}
    }
    if let Some(cutoff) = filter.reserved_before {
        qb.push(" AND reserved_at < ").push_bind(cutoff);
    }
    if let Some(ref query) = filter.query {
        // jsonb `=` is exact, unlike `@>` containment.
        for (key, value) in query.iter() {
            qb.push(" AND fields -> ")
                .push_bind(key.clone())
                .push(" = ")
                .push_bind(value.clone());
        }
    }
}

fn push_sort(qb: &mut QueryBuilder<'_, Postgres>, sort: &Sort) {
    for (i, (key, direction)) in sort.0.iter().enumerate() {
        qb.push(if i == 0 { " ORDER BY " } else { ", " });
        match key {
            SortKey::Priority => {
                qb.push("priority");
            }
            SortKey::ReservedAt => {
                qb.push("reserved_at");
            }
            SortKey::Field(name) => {
                qb.push("fields -> ").push_bind(name.clone());
            }
        }
        qb.push(match direction {
            Direction::Ascending => " ASC",
            Direction::Descending => " DESC",
        });
    }
}

fn push_update(qb: &mut QueryBuilder<'_, Postgres>, update: &Update) {
    match *update {
        Update::Reserve { at } => {
            qb.push("reserved_at = ").push_bind(at);
        }
        Update::Release { priority: None } => {
            qb.push("reserved_at = NULL");
        }
        Update::Release {
            priority: Some(priority),
        } => {
            qb.push("reserved_at = NULL, priority = ").push_bind(priority);
        }
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn observe(operation: &'static str, started: Instant) {
    metrics::store_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    priority: i64,
    reserved_at: Option<i64>,
    fields: Value,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        let fields: Map<String, Value> = serde_json::from_value(self.fields)?;
        Ok(Task {
            id: TaskId(self.id),
            priority: self.priority,
            reserved_at: self.reserved_at,
            fields: TaskFields::from_stored(fields),
        })
    }
}
