//! # Conduit Views
//!
//! Reactive panel view bridge between extensions and the host editor.
//!
//! ## Data Flow
//!
//! ```text
//! extension ──► PanelUpdater::update ──► ViewProviderRegistry ──► renderer
//!                                            ▲
//!   ModelService (editor state) ──► LocationsSource ──► location providers
//! ```
//!
//! ## Learning: Trait Objects at the Seams
//!
//! The view registry, the model service and the location registry belong
//! to the host. The bridge only sees them as `Arc<dyn Trait>`, so tests can
//! swap in recording fakes and hosts can plug in their own implementations.
//! In-memory implementations of each are provided for simple hosts.

pub mod location;
pub mod model;
pub mod panel;
pub mod view;

pub use location::{
    LocationError, LocationProvider, LocationProviderRegistration, LocationProviderRegistry,
    LocationStream, Locations, TextDocumentLocationProviderIdRegistry,
};
pub use model::{
    model_to_text_document_position_params, EditorModel, ModelService, ModelStore,
    ViewComponentData,
};
pub use panel::{ClientViews, ClientViewsApi, PanelComponent, PanelUpdater, PanelViewData};
pub use view::{
    ContributableViewContainer, LocationsSource, PanelState, PanelViewWithComponent, ViewEntry,
    ViewList, ViewProviderDescriptor, ViewProviderRegistry, ViewRegistry,
};

// Re-export LSP types
pub use lsp_types;
