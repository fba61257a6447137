//! Domain types - configuration, documents, and job records
//!
//! These types carry no I/O of their own; the pipeline and engine modules
//! act on them.

pub mod config;
pub mod document;
pub mod job;
