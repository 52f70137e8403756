//! Span helpers for queue operations.

use tracing::Span;

use crate::model::{Task, TaskId};

/// Start a span for one queue operation.
///
/// `task.id` and `task.priority` are declared empty; fill them with
/// [`record_task`] once known.
pub fn start_task_span(operation: &'static str, collection: &str) -> Span {
    tracing::info_span!(
        "queue.op",
        "queue.operation" = operation,
        "queue.collection" = collection,
        "task.id" = tracing::field::Empty,
        "task.priority" = tracing::field::Empty,
    )
}

/// Attach the task being operated on to the span.
pub fn record_task(span: &Span, id: &TaskId, priority: i64) {
    span.record("task.id", tracing::field::display(id));
    span.record("task.priority", priority);
}

/// Emit a state transition event inside the span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

/// State label for a stored task: `reserved` or `available`.
pub fn state_of(task: &Task) -> &'static str {
    if task.is_reserved() {
        "reserved"
    } else {
        "available"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskFields;

    #[test]
    fn state_follows_reserved_at() {
        let mut task = Task {
            id: TaskId::new(),
            priority: 1,
            reserved_at: None,
            fields: TaskFields::new(),
        };
        assert_eq!(state_of(&task), "available");
        task.reserved_at = Some(1_000);
        assert_eq!(state_of(&task), "reserved");
    }
}
