//! Bulk student-import pipeline
//!
//! One upload becomes one [`job`] run: rows are validated by [`row`],
//! persisted through the store collaborators, and every row's outcome is
//! reflected in a snapshot pushed through the [`publisher`] to attached
//! clients. The [`registry`] is the process-wide table of live and recently
//! finished jobs.

pub mod job;
pub mod publisher;
pub mod registry;
pub mod routes;
pub mod row;
pub mod types;

pub use publisher::{ProgressPublisher, StreamMessage, SubscribeError};
pub use registry::JobRegistry;
pub use types::{JobStatus, OutcomeKind, ProgressSnapshot, RowOutcome, UploadJob};
