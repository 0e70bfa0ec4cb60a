//! Panel view bridge.
//!
//! ```text
//!  extension ── update(data) ──► ReplayLatest<PanelViewData>
//!                                        │ map
//!                                        ▼
//!                      PanelViewWithComponent { title, content, priority,
//!                                               location_provider }
//!                                        │
//!                                        ▼
//!                               ViewProviderRegistry
//! ```
//!
//! `location_provider` follows the editor model and switches to the newest
//! lookup on every change.

use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use conduit_core::{
    PendingPolicy, ProxyTag, ProxyValue, ReplayLatest, Teardown, Unsubscribable,
};

use crate::location::TextDocumentLocationProviderIdRegistry;
use crate::model::ModelService;
use crate::view::{
    ContributableViewContainer, LocationsSource, PanelViewWithComponent, ViewProviderDescriptor,
    ViewProviderRegistry,
};

/// Binds a panel to a location provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelComponent {
    /// Id the provider was registered under
    pub location_provider: String,
}

/// Panel contents pushed by an extension. Each push replaces the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelViewData {
    pub title: String,
    pub content: String,
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<PanelComponent>,
}

impl PanelViewData {
    /// Placeholder shown under [`PendingPolicy::Empty`].
    pub fn empty(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            priority: 0,
            component: None,
        }
    }
}

/// Handle an extension uses to drive its panel.
///
/// Proxied across the host boundary. Dropping it ends the views stream but
/// leaves the registration in place; call `unsubscribe` to remove it.
pub struct PanelUpdater {
    data: ReplayLatest<PanelViewData>,
    registration: Mutex<Option<Box<dyn Unsubscribable>>>,
    teardown: Teardown,
    tag: ProxyTag,
}

impl PanelUpdater {
    /// Replaces the panel's data. Ignored after `unsubscribe`.
    pub fn update(&self, data: PanelViewData) {
        if self.teardown.is_closed() {
            tracing::debug!(title = %data.title, "Ignoring update on unsubscribed panel");
            return;
        }
        self.data.next(data);
    }
}

impl Unsubscribable for PanelUpdater {
    /// Ends the views stream and every location stream handed out for this
    /// panel, dropping their model subscriptions and in-flight lookups, then
    /// removes the registration.
    fn unsubscribe(&self) {
        if !self.teardown.close() {
            return;
        }
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(registration) = registration {
            registration.unsubscribe();
        }
    }
}

impl ProxyValue for PanelUpdater {
    fn proxy_tag(&self) -> ProxyTag {
        self.tag
    }
}

/// The views API exposed to extensions.
pub trait ClientViewsApi: ProxyValue {
    fn register_panel_view_provider(&self, id: &str) -> PanelUpdater;
}

/// Host side of the views API.
pub struct ClientViews {
    view_registry: Arc<dyn ViewProviderRegistry>,
    locations: Arc<dyn TextDocumentLocationProviderIdRegistry>,
    models: Arc<dyn ModelService>,
    pending_policy: PendingPolicy,
    tag: ProxyTag,
}

impl ClientViews {
    pub fn new(
        view_registry: Arc<dyn ViewProviderRegistry>,
        locations: Arc<dyn TextDocumentLocationProviderIdRegistry>,
        models: Arc<dyn ModelService>,
    ) -> Self {
        Self {
            view_registry,
            locations,
            models,
            pending_policy: PendingPolicy::default(),
            tag: ProxyTag::must_proxy(),
        }
    }

    pub fn with_pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.pending_policy = policy;
        self
    }
}

impl ProxyValue for ClientViews {
    fn proxy_tag(&self) -> ProxyTag {
        self.tag
    }
}

impl ClientViewsApi for ClientViews {
    fn register_panel_view_provider(&self, id: &str) -> PanelUpdater {
        let data = ReplayLatest::new();
        if self.pending_policy == PendingPolicy::Empty {
            data.next(PanelViewData::empty(id));
        }

        let teardown = Teardown::new();
        let models = Arc::clone(&self.models);
        let locations = Arc::clone(&self.locations);
        let sources = teardown.clone();

        let views = data
            .subscribe()
            .map(move |data: PanelViewData| PanelViewWithComponent {
                title: data.title,
                content: data.content,
                priority: data.priority,
                location_provider: LocationsSource::new(
                    data.component,
                    Arc::clone(&models),
                    Arc::clone(&locations),
                    sources.clone(),
                ),
            })
            .boxed();
        let views = teardown.guard(views).boxed();

        let registration = self.view_registry.register_provider(
            ViewProviderDescriptor {
                id: id.to_string(),
                container: ContributableViewContainer::Panel,
            },
            views,
        );
        tracing::debug!(provider = %id, "Registered panel view provider");

        PanelUpdater {
            data,
            registration: Mutex::new(Some(registration)),
            teardown,
            tag: ProxyTag::must_proxy(),
        }
    }
}
