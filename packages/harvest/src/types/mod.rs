//! Data types for the harvest pipeline.

pub mod query;
pub mod record;
pub mod summary;
