//! Core data models for the thumbnail service.
//!
//! Store-side records map to database tables via `sqlx::FromRow`; the
//! client-facing DTOs serialize as camelCase JSON via `serde`.

pub mod api_response;
pub mod bucket;
pub mod file_metadata;
pub mod job_run;
pub mod metadata;
pub mod object;
