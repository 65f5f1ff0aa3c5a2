use std::fmt;
use std::future::Future;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info};

use crate::error::EngineError;

/// Dialect selected on both sides until the engine reports its own list.
pub const FALLBACK_DIALECT: &str = "clickhouse";

const ERROR_HEADER: &str = "-- ERROR";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DialectId(pub String);

impl DialectId {
    pub fn new(id: impl Into<String>) -> Self {
        DialectId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The engine treats an empty identifier as "no dialect", i.e. its generic SQL.
    fn to_engine(&self) -> Option<DialectId> {
        (!self.0.is_empty()).then(|| self.clone())
    }
}

impl Default for DialectId {
    fn default() -> Self {
        DialectId::new(FALLBACK_DIALECT)
    }
}

impl fmt::Display for DialectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DialectId {
    fn from(id: &str) -> Self {
        DialectId::new(id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorLevel {
    /// Every parse or generation problem fails the translation.
    #[default]
    Strict,
    /// Best effort: problems are skipped where the engine can recover.
    Ignore,
}

impl ErrorLevel {
    /// Name of the matching `sqlglot.ErrorLevel` member.
    pub fn as_sqlglot(&self) -> &'static str {
        match self {
            ErrorLevel::Strict => "RAISE",
            ErrorLevel::Ignore => "IGNORE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateRequest {
    pub sql: String,
    pub read: Option<DialectId>,
    pub write: Option<DialectId>,
    pub error_level: ErrorLevel,
}

/// Renders an engine failure as a SQL comment block so the output pane always
/// has something to display.
pub fn render_error(message: &str) -> String {
    let mut lines = vec![ERROR_HEADER.to_string()];
    lines.extend(message.lines().map(|line| format!("-- {line}")));
    lines.push(String::new());
    lines.join("\n")
}

pub fn is_error_block(rendered: &str) -> bool {
    rendered.lines().next() == Some(ERROR_HEADER)
}

/// Ordered list of the dialects the engine accepts.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct DialectCatalog(Vec<DialectId>);

impl DialectCatalog {
    pub fn new(dialects: Vec<DialectId>) -> Self {
        if dialects.is_empty() {
            return DialectCatalog::default();
        }
        DialectCatalog(dialects)
    }

    pub fn contains(&self, id: &DialectId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DialectId> {
        self.0.iter()
    }

    /// Keeps `id` if the catalog knows it, otherwise falls back to the first entry.
    pub fn reconcile(&self, id: &DialectId) -> DialectId {
        if self.contains(id) {
            return id.clone();
        }
        self.0.first().cloned().unwrap_or_default()
    }
}

impl Default for DialectCatalog {
    fn default() -> Self {
        DialectCatalog(vec![DialectId::default()])
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ServiceStatus {
    Uninitialized,
    Loading,
    Ready,
    Failed { reason: String },
}

impl ServiceStatus {
    /// Initialization is over, either way. `Ready` can still turn into
    /// `Failed` if the engine dies later.
    pub fn is_settled(&self) -> bool {
        matches!(self, ServiceStatus::Ready | ServiceStatus::Failed { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ServiceStatus::Ready)
    }
}

/// The external translation capability.
pub trait Backend: Send + Sync + 'static {
    /// Brings the engine up: runtime, package, entry points.
    fn start(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn transpile(
        &self,
        request: TranslateRequest,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    fn dialects(&self) -> impl Future<Output = Result<Vec<DialectId>, EngineError>> + Send;
}

/// Process-wide translation adapter.
///
/// Answers every call right away: until [`TranslationService::initialize`] has
/// finished it behaves as a stub returning an empty string, which the UI reads
/// as "still loading". Initialization happens at most once and is never undone;
/// an engine that dies afterwards is reported as `Failed` but not restarted.
pub struct TranslationService<B> {
    backend: B,
    init: OnceCell<()>,
    catalog: OnceCell<DialectCatalog>,
    status: watch::Sender<ServiceStatus>,
}

impl<B: Backend> TranslationService<B> {
    pub fn new(backend: B) -> Self {
        let (status, _) = watch::channel(ServiceStatus::Uninitialized);
        TranslationService {
            backend,
            init: OnceCell::new(),
            catalog: OnceCell::new(),
            status,
        }
    }

    /// Starts the backend and loads the dialect catalog. Later calls wait for
    /// the first one and return its outcome.
    pub async fn initialize(&self) -> ServiceStatus {
        self.init
            .get_or_init(|| async {
                self.status.send_replace(ServiceStatus::Loading);
                info!("initializing translation engine");
                match self.load().await {
                    Ok(catalog) => {
                        info!(dialects = catalog.len(), "translation engine ready");
                        // Set before publishing Ready so subscribers never see a stub.
                        let _ = self.catalog.set(catalog);
                        self.status.send_replace(ServiceStatus::Ready);
                    }
                    Err(err) => {
                        error!(error = ?err, "translation engine failed to initialize");
                        self.status.send_replace(ServiceStatus::Failed {
                            reason: format!("{err:#}"),
                        });
                    }
                }
            })
            .await;
        self.status()
    }

    async fn load(&self) -> Result<DialectCatalog> {
        self.backend
            .start()
            .await
            .context("failed to start the translation engine")?;
        let dialects = self
            .backend
            .dialects()
            .await
            .context("failed to list dialects")?;
        Ok(DialectCatalog::new(dialects))
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status.subscribe()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_ready(&self) -> bool {
        self.catalog.initialized()
    }

    pub fn catalog(&self) -> DialectCatalog {
        self.catalog.get().cloned().unwrap_or_default()
    }

    /// Translates `sql` from one dialect to another.
    ///
    /// Returns an empty string while the engine is not ready. Translation
    /// failures come back as an `-- ERROR` block; only engine failures (dead
    /// worker, broken pipe) are returned as `Err`.
    pub async fn translate(
        &self,
        sql: &str,
        from: &DialectId,
        to: &DialectId,
        error_level: ErrorLevel,
    ) -> Result<String, EngineError> {
        if !self.is_ready() {
            return Ok(String::new());
        }
        let request = TranslateRequest {
            sql: sql.to_string(),
            read: from.to_engine(),
            write: to.to_engine(),
            error_level,
        };
        match self.backend.transpile(request).await {
            Ok(rendered) => Ok(rendered),
            Err(EngineError::Sql(message)) => {
                debug!(%from, %to, "translation rejected by engine");
                Ok(render_error(&message))
            }
            Err(err) => {
                self.mark_lost(&err);
                Err(err)
            }
        }
    }

    fn mark_lost(&self, err: &EngineError) {
        let lost = self.status.send_if_modified(|status| {
            if !status.is_ready() {
                return false;
            }
            *status = ServiceStatus::Failed {
                reason: format!("translation engine stopped: {err}"),
            };
            true
        });
        if lost {
            error!(error = %err, "translation engine lost");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    pub(crate) const SYNTAX_ERROR: &str =
        "Invalid expression / Unexpected token. Line 1, Col: 5.\n  SELEC 1";

    /// In-memory backend with per-statement latency.
    ///
    /// Collapses whitespace and swaps identifier quotes for `postgres` and
    /// `mysql` targets; a statement starting with `SELEC` fails in strict mode.
    pub(crate) struct ScriptedBackend {
        dialects: Vec<DialectId>,
        delays: HashMap<String, Duration>,
        fail_start: bool,
        starts: AtomicUsize,
        calls: Mutex<Vec<TranslateRequest>>,
    }

    impl ScriptedBackend {
        /// Statement that makes the backend fail like a dead worker.
        pub(crate) const CRASH: &'static str = "-- crash the worker";

        pub(crate) fn new() -> Self {
            ScriptedBackend {
                dialects: ["clickhouse", "mysql", "postgres"]
                    .into_iter()
                    .map(DialectId::from)
                    .collect(),
                delays: HashMap::new(),
                fail_start: false,
                starts: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            ScriptedBackend {
                fail_start: true,
                ..ScriptedBackend::new()
            }
        }

        pub(crate) fn with_dialects(mut self, dialects: &[&str]) -> Self {
            self.dialects = dialects.iter().copied().map(DialectId::from).collect();
            self
        }

        pub(crate) fn with_delay(mut self, sql: &str, delay: Duration) -> Self {
            self.delays.insert(sql.to_string(), delay);
            self
        }

        pub(crate) fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub(crate) fn calls(&self) -> Vec<TranslateRequest> {
            self.calls.lock().clone()
        }
    }

    pub(crate) fn scripted(request: &TranslateRequest) -> Result<String, EngineError> {
        if request.sql == ScriptedBackend::CRASH {
            return Err(EngineError::Protocol("worker closed its output".to_string()));
        }
        let words: Vec<&str> = request.sql.split_whitespace().collect();
        if request.error_level == ErrorLevel::Strict && words.first() == Some(&"SELEC") {
            return Err(EngineError::Sql(SYNTAX_ERROR.to_string()));
        }
        let sql = words.join(" ");
        let sql = match request.write.as_ref().map(DialectId::as_str) {
            Some("postgres") => sql.replace('`', "\""),
            Some("mysql") => sql.replace('"', "`"),
            _ => sql,
        };
        Ok(format!("{sql}\n"))
    }

    impl Backend for ScriptedBackend {
        async fn start(&self) -> Result<(), EngineError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_start {
                return Err(EngineError::Protocol(
                    "cannot import sqlglot: No module named 'sqlglot'".to_string(),
                ));
            }
            Ok(())
        }

        async fn transpile(&self, request: TranslateRequest) -> Result<String, EngineError> {
            self.calls.lock().push(request.clone());
            if let Some(delay) = self.delays.get(&request.sql) {
                tokio::time::sleep(*delay).await;
            }
            scripted(&request)
        }

        async fn dialects(&self) -> Result<Vec<DialectId>, EngineError> {
            Ok(self.dialects.clone())
        }
    }
}
