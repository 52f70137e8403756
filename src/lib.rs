//! # taskq
//!
//! Durable, priority-ordered work queue over a document store.
//!
//! Tasks are reserved with one atomic find-and-update, released by
//! rescheduling or by an explicit timeout sweep, and acknowledged by
//! removal. Delivery is at-least-once.
//!
//! Stores: PostgreSQL ([`db::Db`]) and in-process ([`store::MemoryStore`]).

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod policy;
pub mod queue;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{
    AddOptions, Direction, Query, RescheduleOptions, ReserveOptions, SearchOptions, Sort, SortKey,
    Task, TaskFields, TaskId,
};
pub use queue::Queue;
