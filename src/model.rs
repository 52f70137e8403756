//! Core data model.
//!
//! A task is an opaque mapping of caller fields plus three engine-owned
//! metadata fields: identity, priority, and the reservation timestamp.
//! Metadata lives in dedicated struct fields; the caller payload lives in
//! [`TaskFields`], which refuses keys from the reserved `_` namespace.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prefix reserved for engine-owned fields.
pub const RESERVED_PREFIX: &str = "_";
/// Stored name of the identity field.
pub const ID_FIELD: &str = "_id";
/// Stored name of the priority field.
pub const PRIORITY_FIELD: &str = "_priority";
/// Stored name of the reservation timestamp field.
pub const RESERVED_AT_FIELD: &str = "_reserved_at";

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work as stored in the queue collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned on insertion, stable until removal.
    #[serde(rename = "_id")]
    pub id: TaskId,

    /// Reservation order key, ascending. Epoch seconds by convention.
    #[serde(rename = "_priority")]
    pub priority: i64,

    /// Set while a consumer holds the task. Epoch milliseconds.
    #[serde(rename = "_reserved_at", default)]
    pub reserved_at: Option<i64>,

    /// Caller payload.
    #[serde(flatten)]
    pub fields: TaskFields,
}

impl Task {
    pub fn is_reserved(&self) -> bool {
        self.reserved_at.is_some()
    }

    pub fn is_available(&self) -> bool {
        self.reserved_at.is_none()
    }
}

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 chars of the UUID, for terminal output.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TaskId)
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// Caller-owned task payload. Top-level keys never start with `_`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct TaskFields(Map<String, Value>);

/// User-field equality query used by `search`. Same rules as the payload.
pub type Query = TaskFields;

impl TaskFields {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from a JSON value. Must be an object with no reserved keys.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::try_from(map),
            Value::Null => Ok(Self::new()),
            other => Err(Error::InvalidArgument(format!(
                "task fields must be a JSON object, got {other}"
            ))),
        }
    }

    /// Insert one field, rejecting reserved names.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        check_field_name(&key)?;
        Ok(self.0.insert(key, value.into()))
    }

    /// Chaining form of [`TaskFields::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// True when every key of `query` is present here with an equal value.
    pub fn matches(&self, query: &Query) -> bool {
        query.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }

    /// Keep only the named fields.
    pub fn project(&self, names: &[String]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Rebuild from a stored document. Keys were validated on the way in;
    /// anything in the reserved namespace is dropped rather than trusted.
    pub(crate) fn from_stored(map: Map<String, Value>) -> Self {
        Self(
            map.into_iter()
                .filter(|(k, _)| !k.starts_with(RESERVED_PREFIX))
                .collect(),
        )
    }
}

impl TryFrom<Map<String, Value>> for TaskFields {
    type Error = Error;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        for key in map.keys() {
            check_field_name(key)?;
        }
        Ok(Self(map))
    }
}

impl Serialize for TaskFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Reject names in the reserved namespace.
pub fn check_field_name(name: &str) -> Result<()> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(Error::ReservedField(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

/// What to order results by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Priority,
    ReservedAt,
    /// A top-level caller field.
    Field(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Ordered list of sort keys; earlier keys take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort(pub Vec<(SortKey, Direction)>);

impl Sort {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn by(key: SortKey, direction: Direction) -> Self {
        Self(vec![(key, direction)])
    }

    pub fn then(mut self, key: SortKey, direction: Direction) -> Self {
        self.0.push((key, direction));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Caller field names must be non-empty and outside the reserved namespace.
    pub fn validate(&self) -> Result<()> {
        for (key, _) in &self.0 {
            if let SortKey::Field(name) = key {
                if name.is_empty() {
                    return Err(Error::InvalidArgument("empty sort field name".to_string()));
                }
                check_field_name(name)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for `add_task`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Defaults to now.
    pub priority: Option<i64>,
}

impl AddOptions {
    pub fn priority(priority: i64) -> Self {
        Self {
            priority: Some(priority),
        }
    }
}

/// Options for `reserve_task`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReserveOptions {
    /// Visibility horizon. Defaults to now.
    pub max_priority: Option<i64>,
}

impl ReserveOptions {
    pub fn max_priority(max_priority: i64) -> Self {
        Self {
            max_priority: Some(max_priority),
        }
    }
}

/// Options for `reschedule_task`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RescheduleOptions {
    /// Defaults to the task's last known priority.
    pub priority: Option<i64>,
}

impl RescheduleOptions {
    pub fn priority(priority: i64) -> Self {
        Self {
            priority: Some(priority),
        }
    }
}

/// Options for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// `Some(true)` only reserved tasks, `Some(false)` only available ones.
    pub reserved: Option<bool>,
    pub sort: Sort,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    /// Caller fields to return. `None` returns all of them. Metadata is
    /// always returned.
    pub fields: Option<Vec<String>>,
}

impl SearchOptions {
    pub fn reserved(mut self, reserved: bool) -> Self {
        self.reserved = Some(reserved);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}
