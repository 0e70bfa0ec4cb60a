//! The host's live editor model as seen by the view bridge.

use futures::stream::BoxStream;
use lsp_types::{Range, TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams};
use serde::{Deserialize, Serialize};

use conduit_core::ReplayLatest;

/// Snapshot of what the editor is showing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorModel {
    /// Editors currently visible to the user
    #[serde(default)]
    pub visible_view_components: Vec<ViewComponentData>,
}

/// One visible editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewComponentData {
    /// The open document
    pub item: TextDocumentItem,

    /// Selections, the first one being the primary cursor
    #[serde(default)]
    pub selections: Vec<Range>,

    /// Whether this editor has focus
    #[serde(default)]
    pub is_active: bool,
}

/// Derives position params from the active editor's primary selection.
///
/// Returns `None` when no editor is active or it has no selection.
pub fn model_to_text_document_position_params(
    model: &EditorModel,
) -> Option<TextDocumentPositionParams> {
    let active = model
        .visible_view_components
        .iter()
        .find(|component| component.is_active)?;
    let selection = active.selections.first()?;

    Some(TextDocumentPositionParams::new(
        TextDocumentIdentifier::new(active.item.uri.clone()),
        selection.start,
    ))
}

/// Source of editor model changes.
pub trait ModelService: Send + Sync {
    /// Emits the current model on subscription and again on every change.
    fn model(&self) -> BoxStream<'static, EditorModel>;
}

/// In-memory [`ModelService`] the host pushes model changes into.
#[derive(Clone)]
pub struct ModelStore {
    model: ReplayLatest<EditorModel>,
}

impl ModelStore {
    /// Creates a store holding an empty model.
    pub fn new() -> Self {
        Self {
            model: ReplayLatest::with_value(EditorModel::default()),
        }
    }

    /// Replaces the current model and notifies subscribers.
    pub fn set_model(&self, model: EditorModel) {
        self.model.next(model);
    }

    pub fn current(&self) -> EditorModel {
        self.model.get().unwrap_or_default()
    }

    /// Number of live model subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.model.listener_count()
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelService for ModelStore {
    fn model(&self) -> BoxStream<'static, EditorModel> {
        self.model.subscribe()
    }
}
