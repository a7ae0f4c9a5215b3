//! Core trait abstractions for the harvest pipeline.
//!
//! These traits define the seams applications implement to plug in an
//! upstream feed and a storage backend.

pub mod source;
pub mod store;
