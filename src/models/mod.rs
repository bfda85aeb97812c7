//! Core data models for the document upload pipeline.
//!
//! Buckets and objects map to rows of the local object store via
//! `sqlx::FromRow`; upload types are the values exchanged with callers of
//! the pipeline and serialize naturally as JSON via `serde`.

pub mod bucket;
pub mod document;
pub mod object;
pub mod upload;
