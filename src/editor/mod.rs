//! Live translation state for one editor pair.

mod debounce;
mod events;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use debounce::Debouncer;
pub use events::{
    ApplyEvent, EditEvent, EditorEvent, SourceDialectEvent, SwapEvent, TargetDialectEvent,
};

use crate::error::EditorError;
use crate::translate::{Backend, DialectId, ErrorLevel, ServiceStatus, TranslationService};

pub const DEFAULT_SOURCE: &str = "SELECT
    passenger_count,
    toYear(pickup_datetime) AS year,
    round(trip_distance) AS distance,
    count(*)
FROM trips
GROUP BY passenger_count, year, distance
ORDER BY year, count(*) DESC;
";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    pub source_text: String,
    /// Empty until the translation service is ready.
    pub rendered_text: String,
    pub source_dialect: DialectId,
    pub target_dialect: DialectId,
}

impl EditorState {
    pub fn new(source_text: impl Into<String>) -> Self {
        EditorState {
            source_text: source_text.into(),
            rendered_text: String::new(),
            source_dialect: DialectId::default(),
            target_dialect: DialectId::default(),
        }
    }
}

impl Default for EditorState {
    fn default() -> Self {
        EditorState::new(DEFAULT_SOURCE)
    }
}

/// Published after every state change.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub state: EditorState,
    /// Bumped only when the controller itself rewrites the source buffer, so a
    /// client knows when to replace what the user is typing.
    pub source_revision: u64,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Source,
    Target,
}

/// A translation request frozen at the moment it was issued.
struct Ticket {
    seq: u64,
    sql: String,
    from: DialectId,
    to: DialectId,
    level: ErrorLevel,
}

struct Session {
    state: EditorState,
    source_revision: u64,
    /// Sequence number of the latest issued translation.
    issued: u64,
}

impl Session {
    fn issue(&mut self, level: ErrorLevel) -> Ticket {
        self.issued += 1;
        Ticket {
            seq: self.issued,
            sql: self.state.source_text.clone(),
            from: self.state.source_dialect.clone(),
            to: self.state.target_dialect.clone(),
            level,
        }
    }

    fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            state: self.state.clone(),
            source_revision: self.source_revision,
        }
    }
}

struct Shared<B> {
    service: Arc<TranslationService<B>>,
    session: Mutex<Session>,
    updates: watch::Sender<EditorSnapshot>,
}

impl<B: Backend> Shared<B> {
    fn publish(&self, session: &Session) {
        self.updates.send_replace(session.snapshot());
    }

    async fn render(&self, ticket: Ticket) {
        let seq = ticket.seq;
        match self
            .service
            .translate(&ticket.sql, &ticket.from, &ticket.to, ticket.level)
            .await
        {
            Ok(rendered) => self.apply(seq, rendered),
            Err(err) => warn!(seq, error = %err, "translation failed, keeping previous output"),
        }
    }

    /// Only the latest issued request may touch the output, whichever path
    /// (immediate or debounced) it came from.
    fn apply(&self, seq: u64, rendered: String) {
        let mut session = self.session.lock();
        if seq != session.issued {
            debug!(seq, latest = session.issued, "discarding stale translation");
            return;
        }
        session.state.rendered_text = rendered;
        self.publish(&session);
    }

    /// Re-renders the current buffer in strict mode.
    fn refresh(self: &Arc<Self>) {
        let ticket = self.session.lock().issue(ErrorLevel::Strict);
        self.spawn_render(ticket);
    }

    fn spawn_render(self: &Arc<Self>, ticket: Ticket) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.render(ticket).await });
    }

    fn adopt_catalog(&self) {
        let catalog = self.service.catalog();
        let mut session = self.session.lock();
        let state = &mut session.state;
        state.source_dialect = catalog.reconcile(&state.source_dialect);
        state.target_dialect = catalog.reconcile(&state.target_dialect);
        self.publish(&session);
    }
}

/// Owns the editor pair of one client and keeps its output in sync with the
/// source buffer.
///
/// Each edit is translated twice: right away in lenient mode for fast
/// feedback, then in strict mode once the user pauses typing. Every request is
/// tagged with a sequence number when issued and its result is dropped if a
/// newer request exists by the time it resolves.
pub struct EditorController<B: Backend> {
    shared: Arc<Shared<B>>,
    debouncer: Debouncer,
    readiness: JoinHandle<()>,
}

impl<B: Backend> EditorController<B> {
    /// Must be called from within a Tokio runtime.
    pub fn new(service: Arc<TranslationService<B>>, debounce: Duration) -> Self {
        let session = Session {
            state: EditorState::default(),
            source_revision: 1,
            issued: 0,
        };
        let (updates, _) = watch::channel(session.snapshot());
        let shared = Arc::new(Shared {
            service,
            session: Mutex::new(session),
            updates,
        });
        let readiness = tokio::spawn(follow_service(Arc::clone(&shared)));
        EditorController {
            shared,
            debouncer: Debouncer::new(debounce),
            readiness,
        }
    }

    pub fn state(&self) -> EditorState {
        self.shared.session.lock().state.clone()
    }

    pub fn snapshot(&self) -> EditorSnapshot {
        self.shared.session.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<EditorSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn on_source_edit(&self, text: impl Into<String>) {
        let ticket = {
            let mut session = self.shared.session.lock();
            session.state.source_text = text.into();
            self.shared.publish(&session);
            session.issue(ErrorLevel::Ignore)
        };
        self.shared.spawn_render(ticket);

        let shared = Arc::clone(&self.shared);
        self.debouncer.schedule(async move {
            let ticket = shared.session.lock().issue(ErrorLevel::Strict);
            shared.render(ticket).await;
        });
    }

    pub fn on_source_dialect_change(&self, id: DialectId) -> Result<(), EditorError> {
        self.change_dialect(Side::Source, id)
    }

    pub fn on_target_dialect_change(&self, id: DialectId) -> Result<(), EditorError> {
        self.change_dialect(Side::Target, id)
    }

    fn change_dialect(&self, side: Side, id: DialectId) -> Result<(), EditorError> {
        if !self.shared.service.catalog().contains(&id) {
            warn!(dialect = %id, ?side, "rejecting unknown dialect");
            return Err(EditorError::UnknownDialect(id));
        }
        let ticket = {
            let mut session = self.shared.session.lock();
            match side {
                Side::Source => session.state.source_dialect = id,
                Side::Target => session.state.target_dialect = id,
            }
            self.shared.publish(&session);
            session.issue(ErrorLevel::Strict)
        };
        self.shared.spawn_render(ticket);
        Ok(())
    }

    /// Exchanges the two buffers and the two dialects, then re-renders from
    /// the new source.
    ///
    /// While the service is loading the output buffer is only a placeholder,
    /// so just the dialects are exchanged.
    pub fn swap(&self) {
        self.debouncer.cancel();
        let ready = self.shared.service.is_ready();
        let ticket = {
            let mut session = self.shared.session.lock();
            let state = &mut session.state;
            std::mem::swap(&mut state.source_dialect, &mut state.target_dialect);
            if ready {
                std::mem::swap(&mut state.source_text, &mut state.rendered_text);
                session.source_revision += 1;
            }
            self.shared.publish(&session);
            session.issue(ErrorLevel::Strict)
        };
        self.shared.spawn_render(ticket);
    }

    /// Re-renders the current buffer in strict mode.
    pub fn refresh(&self) {
        self.shared.refresh();
    }
}

impl<B: Backend> Drop for EditorController<B> {
    fn drop(&mut self) {
        self.readiness.abort();
    }
}

/// Waits for the service to settle; once ready, aligns the dialects with the
/// catalog and replaces the loading placeholder with a real render.
async fn follow_service<B: Backend>(shared: Arc<Shared<B>>) {
    let mut status = shared.service.subscribe();
    let ready = match status.wait_for(ServiceStatus::is_settled).await {
        Ok(status) => status.is_ready(),
        Err(_) => false,
    };
    if !ready {
        debug!("translation service unavailable, output stays empty");
        return;
    }
    shared.adopt_catalog();
    shared.refresh();
}
