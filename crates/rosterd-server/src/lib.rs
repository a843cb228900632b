//! Rosterd Server Library
//!
//! HTTP backend for the school-management portal's bulk student import.
//!
//! # Overview
//!
//! The server accepts a CSV roster upload, registers an ingest job, and
//! returns an upload identifier immediately. The job runs on its own tokio
//! task: every row is validated, persisted through the student store, and
//! reflected in a progress snapshot that is fanned out over Server-Sent
//! Events to any number of attached clients.
//!
//! - **Upload adapter**: `POST /api/v1/imports/students` (multipart)
//! - **Progress stream**: `GET /api/v1/imports/students/:id/events` (SSE)
//! - **Status read**: `GET /api/v1/imports/students/:id`
//!
//! # Architecture
//!
//! The import pipeline is split into the pieces described in `DESIGN.md`:
//!
//! - `import::row` — pure per-row validation against an in-memory code book
//! - `import::job` — the ingest job lifecycle and row loop
//! - `import::registry` — process-wide job table with retention sweep
//! - `import::publisher` — broadcast fan-out with latest-snapshot replay
//! - `import::routes` — the HTTP adapters
//! - `store` — the data-store collaborators (Postgres and in-memory)

pub mod api;
pub mod config;
pub mod error;
pub mod import;
pub mod middleware;
pub mod store;

// Re-export commonly used types
pub use error::{AppError, AppResult};
