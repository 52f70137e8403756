//! In-memory task store.
//!
//! Every operation runs under one lock acquisition, which is what makes
//! `find_one_and_update` atomic here. Documents keep insertion order, so
//! unsorted reads and priority ties come back oldest first.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Filter, FindOptions, NewTask, TaskStore, Update};
use crate::error::Result;
use crate::model::{Direction, Sort, SortKey, Task, TaskId};

/// Collections keyed by name, each an insertion-ordered list of documents.
#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<Task>>,
}

/// Process-local store. Cloning shares the same documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, collection: &str, task: NewTask) -> Result<TaskId> {
        let id = TaskId::new();
        let mut state = self.state.lock().await;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(Task {
                id,
                priority: task.priority,
                reserved_at: None,
                fields: task.fields,
            });
        Ok(id)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: &Sort,
    ) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(None);
        };

        // min_by keeps the first of equal elements, so ties go to the oldest.
        let chosen = docs
            .iter()
            .enumerate()
            .filter(|(_, t)| filter.matches(t))
            .min_by(|(_, a), (_, b)| compare(sort, a, b))
            .map(|(i, _)| i);

        Ok(chosen.map(|i| {
            let before = docs[i].clone();
            update.apply(&mut docs[i]);
            before
        }))
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64> {
        let mut state = self.state.lock().await;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut affected = 0;
        for task in docs.iter_mut().filter(|t| filter.matches(t)) {
            update.apply(task);
            affected += 1;
        }
        Ok(affected)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        let Some(docs) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<Task> = docs.iter().filter(|t| filter.matches(t)).cloned().collect();
        if !options.sort.is_empty() {
            found.sort_by(|a, b| compare(&options.sort, a, b));
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map_or(usize::MAX, |l| l as usize);
        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|mut task| {
                if let Some(ref names) = options.fields {
                    task.fields = task.fields.project(names);
                }
                task
            })
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .get(collection)
            .map_or(0, |docs| docs.iter().filter(|t| filter.matches(t)).count() as u64))
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(None);
        };
        let found = docs.iter().position(|t| filter.matches(t));
        Ok(found.map(|i| docs.remove(i)))
    }
}

/// Order two documents by `sort`. Missing values sort after present ones in
/// ascending order, matching PostgreSQL's default NULLS LAST.
fn compare(sort: &Sort, a: &Task, b: &Task) -> Ordering {
    for (key, direction) in &sort.0 {
        let ord = match key {
            SortKey::Priority => a.priority.cmp(&b.priority),
            SortKey::ReservedAt => nulls_last(a.reserved_at.as_ref(), b.reserved_at.as_ref(), Ord::cmp),
            SortKey::Field(name) => nulls_last(a.fields.get(name), b.fields.get(name), compare_json),
        };
        let ord = match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn nulls_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&a, &b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// jsonb ordering: null < string < number < boolean < array < object.
fn compare_json(a: &&Value, b: &&Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        // Containers compare by size only; good enough for in-process use.
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskFields;
    use serde_json::json;

    async fn seed(store: &MemoryStore, items: &[(i64, Value)]) -> Vec<TaskId> {
        let mut ids = Vec::new();
        for (priority, fields) in items {
            let id = store
                .insert(
                    "q",
                    NewTask {
                        priority: *priority,
                        fields: TaskFields::from_value(fields.clone()).unwrap(),
                    },
                )
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn find_one_and_update_returns_pre_image() {
        let store = MemoryStore::new();
        let ids = seed(&store, &[(5, json!({})), (1, json!({}))]).await;

        let filter = Filter {
            reserved: Some(false),
            ..Filter::default()
        };
        let sort = Sort::by(SortKey::Priority, Direction::Ascending);
        let before = store
            .find_one_and_update("q", &filter, &Update::Reserve { at: 42 }, &sort)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(before.id, ids[1]);
        assert_eq!(before.reserved_at, None);

        let after = store
            .find("q", &Filter::id(ids[1]), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(after[0].reserved_at, Some(42));
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = MemoryStore::new();
        seed(&store, &[(1, json!({}))]).await;
        assert_eq!(store.count("q", &Filter::all()).await.unwrap(), 1);
        assert_eq!(store.count("other", &Filter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_sorts_skips_limits_and_projects() {
        let store = MemoryStore::new();
        seed(
            &store,
            &[
                (1, json!({"n": "c", "x": 1})),
                (2, json!({"n": "a", "x": 2})),
                (3, json!({"n": "b", "x": 3})),
                (4, json!({"x": 4})),
            ],
        )
        .await;

        let options = FindOptions {
            sort: Sort::by(SortKey::Field("n".into()), Direction::Ascending),
            skip: Some(1),
            limit: Some(2),
            fields: Some(vec!["n".into()]),
        };
        let found = store.find("q", &Filter::all(), &options).await.unwrap();
        let names: Vec<_> = found.iter().map(|t| t.fields.get("n").cloned()).collect();
        assert_eq!(names, vec![Some(json!("b")), Some(json!("c"))]);
        assert!(found.iter().all(|t| t.fields.get("x").is_none()));
    }

    #[tokio::test]
    async fn delete_one_returns_the_stored_document() {
        let store = MemoryStore::new();
        let ids = seed(&store, &[(1, json!({}))]).await;
        store
            .update_many("q", &Filter::id(ids[0]), &Update::Reserve { at: 7 })
            .await
            .unwrap();

        let deleted = store.delete_one("q", &Filter::id(ids[0])).await.unwrap().unwrap();
        assert_eq!(deleted.id, ids[0]);
        assert_eq!(deleted.reserved_at, Some(7));
        assert!(store.delete_one("q", &Filter::id(ids[0])).await.unwrap().is_none());
    }
}
