//! Application services: submission pipeline, background work and expiry.

pub mod error;
pub mod links;
pub mod pipeline;
pub mod render;
pub mod sweeper;
pub mod tasks;
pub mod workers;
