//! Live SQL dialect playground backed by sqlglot.
//!
//! The translation itself is delegated to sqlglot running in a Python worker
//! ([`engine::SqlglotEngine`]). This crate only wires editor state to it: a
//! one-time lazily initialized [`TranslationService`] and a per-client
//! [`EditorController`] that re-translates as the user types.

pub mod config;
pub mod editor;
pub mod engine;
pub mod error;
pub mod server;
pub mod translate;

pub use config::{Config, EngineConfig};
pub use editor::{EditorController, EditorEvent, EditorSnapshot, EditorState};
pub use error::{ConfigError, EditorError, EngineError};
pub use translate::{
    render_error, Backend, DialectCatalog, DialectId, ErrorLevel, ServiceStatus,
    TranslationService,
};
