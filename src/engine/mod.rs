//! Translation backends.
//!
//! The only production engine is sqlglot, hosted in a Python worker process.

mod sqlglot;

pub use sqlglot::SqlglotEngine;
