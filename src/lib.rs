//! Markdown to mind-map rendering service.
//!
//! Submissions are fingerprinted and deduplicated, converted to an
//! interactive HTML mind map synchronously, and snapshotted to PNG in the
//! background. A sweeper expires stored artifacts by age.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
