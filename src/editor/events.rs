use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::editor::EditorController;
use crate::error::EditorError;
use crate::translate::{Backend, DialectId};

#[enum_dispatch]
pub trait ApplyEvent {
    fn apply<B: Backend>(&self, controller: &EditorController<B>) -> Result<(), EditorError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EditEvent {
    pub text: String,
}

impl ApplyEvent for EditEvent {
    fn apply<B: Backend>(&self, controller: &EditorController<B>) -> Result<(), EditorError> {
        controller.on_source_edit(self.text.as_str());
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceDialectEvent {
    pub dialect: DialectId,
}

impl ApplyEvent for SourceDialectEvent {
    fn apply<B: Backend>(&self, controller: &EditorController<B>) -> Result<(), EditorError> {
        controller.on_source_dialect_change(self.dialect.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetDialectEvent {
    pub dialect: DialectId,
}

impl ApplyEvent for TargetDialectEvent {
    fn apply<B: Backend>(&self, controller: &EditorController<B>) -> Result<(), EditorError> {
        controller.on_target_dialect_change(self.dialect.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {}

impl ApplyEvent for SwapEvent {
    fn apply<B: Backend>(&self, controller: &EditorController<B>) -> Result<(), EditorError> {
        controller.swap();
        Ok(())
    }
}

/// What a client can do to its editor pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
#[enum_dispatch(ApplyEvent)]
pub enum EditorEvent {
    Edit(EditEvent),
    SourceDialect(SourceDialectEvent),
    TargetDialect(TargetDialectEvent),
    Swap(SwapEvent),
}
