//! View registry: where composed panel views end up.
//!
//! ## Learning: Ownership as Cancellation
//!
//! A registered provider hands over a stream. Whoever owns the stream owns
//! the subscription chain behind it: dropping the stream drops the panel
//! data subscription and, through [`LocationsSource`], any live location
//! lookup. The panel also keeps a [`Teardown`] over every stream it hands
//! out, so unsubscribing drops those chains even while a renderer still
//! holds the streams. `ViewRegistry` drives each stream on its own tokio
//! task, so aborting the task is the registry's side of the teardown.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use uuid::Uuid;

use conduit_core::{switch_latest, ReplayLatest, Teardown, Unsubscribable};

use crate::location::{Locations, TextDocumentLocationProviderIdRegistry};
use crate::model::{model_to_text_document_position_params, EditorModel, ModelService};
use crate::panel::PanelComponent;

/// Where in the host UI a view is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributableViewContainer {
    Panel,
    GlobalNavbar,
}

/// Identifies a registered view provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewProviderDescriptor {
    pub id: String,
    pub container: ContributableViewContainer,
}

/// A panel view ready for rendering.
#[derive(Debug, Clone)]
pub struct PanelViewWithComponent {
    pub title: String,
    pub content: String,
    pub priority: i32,

    /// Locations for the current editor position, recomputed on every
    /// model change.
    pub location_provider: LocationsSource,
}

/// Lazy, restartable source of location results for one panel view.
///
/// Each call to [`LocationsSource::subscribe`] starts a fresh subscription
/// to the editor model. For every model change the previous lookup is
/// cancelled before the next one starts.
#[derive(Clone)]
pub struct LocationsSource {
    component: Option<PanelComponent>,
    models: Arc<dyn ModelService>,
    locations: Arc<dyn TextDocumentLocationProviderIdRegistry>,
    teardown: Teardown,
}

impl LocationsSource {
    pub(crate) fn new(
        component: Option<PanelComponent>,
        models: Arc<dyn ModelService>,
        locations: Arc<dyn TextDocumentLocationProviderIdRegistry>,
        teardown: Teardown,
    ) -> Self {
        Self {
            component,
            models,
            locations,
            teardown,
        }
    }

    pub fn component(&self) -> Option<&PanelComponent> {
        self.component.as_ref()
    }

    /// Subscribes to location results.
    ///
    /// The stream ends when the owning panel is unsubscribed. At that point
    /// its model subscription and any in-flight lookup are dropped, whether
    /// or not the stream is polled again.
    pub fn subscribe(&self) -> BoxStream<'static, Locations> {
        let component = self.component.clone();
        let locations = Arc::clone(&self.locations);
        let lookups = self
            .models
            .model()
            .map(move |model| lookup(component.as_ref(), &model, locations.as_ref()));

        self.teardown.guard(switch_latest(lookups).boxed()).boxed()
    }
}

impl fmt::Debug for LocationsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationsSource")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

fn no_locations() -> BoxStream<'static, Locations> {
    stream::once(future::ready(None)).boxed()
}

fn lookup(
    component: Option<&PanelComponent>,
    model: &EditorModel,
    registry: &dyn TextDocumentLocationProviderIdRegistry,
) -> BoxStream<'static, Locations> {
    let Some(component) = component else {
        return no_locations();
    };
    let Some(params) = model_to_text_document_position_params(model) else {
        return no_locations();
    };

    let provider = component.location_provider.clone();
    registry
        .get_locations(&provider, params)
        .scan((), move |_, result| {
            future::ready(match result {
                Ok(locations) => Some(locations),
                Err(err) => {
                    // Ends this lookup only; the next model change starts a new one.
                    tracing::warn!(provider = %provider, "Location lookup failed: {}", err);
                    None
                }
            })
        })
        .boxed()
}

/// Accepts view providers from the bridge.
pub trait ViewProviderRegistry: Send + Sync {
    /// Registers a provider's stream of views. Unsubscribing the returned
    /// handle must drop the stream.
    fn register_provider(
        &self,
        descriptor: ViewProviderDescriptor,
        views: BoxStream<'static, PanelViewWithComponent>,
    ) -> Box<dyn Unsubscribable>;
}

/// Render state of a registered panel.
#[derive(Debug, Clone)]
pub enum PanelState {
    /// The provider has not pushed any data yet.
    Pending,
    Ready(PanelViewWithComponent),
}

impl PanelState {
    pub fn view(&self) -> Option<&PanelViewWithComponent> {
        match self {
            PanelState::Pending => None,
            PanelState::Ready(view) => Some(view),
        }
    }
}

/// A registered provider and its latest state.
#[derive(Debug, Clone)]
pub struct ViewEntry {
    pub registration: Uuid,
    pub descriptor: ViewProviderDescriptor,
    pub state: PanelState,
}

/// Immutable snapshot of registered views, in registration order.
pub type ViewList = Arc<[ViewEntry]>;

/// In-memory [`ViewProviderRegistry`] that renderers subscribe to.
///
/// Provider streams are driven on tokio tasks. Registering from a thread
/// without a runtime context needs [`ViewRegistry::with_runtime`]; without
/// one the entry stays [`PanelState::Pending`].
#[derive(Clone)]
pub struct ViewRegistry {
    entries: ReplayLatest<ViewList>,
    runtime: Option<Handle>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self {
            entries: ReplayLatest::with_value(Vec::new().into()),
            runtime: None,
        }
    }

    /// Drives provider streams on `runtime` instead of the caller's runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// All registered views, re-emitted on every change.
    pub fn views(&self) -> BoxStream<'static, ViewList> {
        self.entries.subscribe()
    }

    pub fn snapshot(&self) -> ViewList {
        self.entries.get().unwrap_or_else(|| Vec::new().into())
    }

    /// Returns the first registered view with this provider id.
    pub fn get(&self, id: &str) -> Option<ViewEntry> {
        self.snapshot()
            .iter()
            .find(|entry| entry.descriptor.id == id)
            .cloned()
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn set_state(entries: &ReplayLatest<ViewList>, registration: Uuid, state: PanelState) -> bool {
    entries.update(|current| {
        let current = current?;
        let index = current
            .iter()
            .position(|entry| entry.registration == registration)?;
        let mut next = current.to_vec();
        next[index].state = state;
        Some(next.into())
    })
}

impl ViewProviderRegistry for ViewRegistry {
    fn register_provider(
        &self,
        descriptor: ViewProviderDescriptor,
        mut views: BoxStream<'static, PanelViewWithComponent>,
    ) -> Box<dyn Unsubscribable> {
        let registration = Uuid::new_v4();
        tracing::debug!(provider = %descriptor.id, %registration, "Registered view provider");

        self.entries.update(|current| {
            let mut next = current.map(|list| list.to_vec()).unwrap_or_default();
            next.push(ViewEntry {
                registration,
                descriptor,
                state: PanelState::Pending,
            });
            Some(next.into())
        });

        let task = match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                let entries = self.entries.clone();
                let task = runtime.spawn(async move {
                    while let Some(view) = views.next().await {
                        if !set_state(&entries, registration, PanelState::Ready(view)) {
                            break;
                        }
                    }
                });
                Some(task.abort_handle())
            }
            None => {
                tracing::warn!(
                    %registration,
                    "No tokio runtime to drive view provider; panel stays pending"
                );
                None
            }
        };

        Box::new(ViewRegistration {
            entries: self.entries.clone(),
            registration,
            task,
            done: AtomicBool::new(false),
        })
    }
}

struct ViewRegistration {
    entries: ReplayLatest<ViewList>,
    registration: Uuid,
    task: Option<AbortHandle>,
    done: AtomicBool,
}

impl Unsubscribable for ViewRegistration {
    fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = &self.task {
            task.abort();
        }

        let registration = self.registration;
        self.entries.update(|current| {
            let next: Vec<_> = current?
                .iter()
                .filter(|entry| entry.registration != registration)
                .cloned()
                .collect();
            Some(next.into())
        });
        tracing::debug!(%registration, "Unregistered view provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationProviderRegistry;
    use crate::model::ModelStore;

    fn descriptor(id: &str) -> ViewProviderDescriptor {
        ViewProviderDescriptor {
            id: id.to_string(),
            container: ContributableViewContainer::Panel,
        }
    }

    #[test]
    fn test_container_wire_names() {
        assert_eq!(
            serde_json::to_value(ContributableViewContainer::GlobalNavbar).unwrap(),
            serde_json::json!("global-navbar")
        );
        assert_eq!(
            serde_json::to_value(ContributableViewContainer::Panel).unwrap(),
            serde_json::json!("panel")
        );
    }

    #[tokio::test]
    async fn test_registration_starts_pending_and_unsubscribe_removes() {
        let registry = ViewRegistry::new();
        let handle = registry.register_provider(descriptor("p"), stream::pending().boxed());

        let entry = registry.get("p").unwrap();
        assert!(matches!(entry.state, PanelState::Pending));

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(registry.get("p").is_none());
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_only_removes_own_registration() {
        let registry = ViewRegistry::new();
        let first = registry.register_provider(descriptor("p"), stream::pending().boxed());
        let _second = registry.register_provider(descriptor("p"), stream::pending().boxed());

        first.unsubscribe();
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_registration_without_runtime_stays_pending() {
        let registry = ViewRegistry::new();
        let handle = registry.register_provider(descriptor("p"), stream::empty().boxed());

        assert!(matches!(registry.get("p").unwrap().state, PanelState::Pending));
        handle.unsubscribe();
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_registration_drives_on_supplied_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let registry = ViewRegistry::new().with_runtime(runtime.handle().clone());
        let view = PanelViewWithComponent {
            title: "A".to_string(),
            content: String::new(),
            priority: 0,
            location_provider: LocationsSource::new(
                None,
                Arc::new(ModelStore::new()),
                Arc::new(LocationProviderRegistry::new()),
                Teardown::new(),
            ),
        };

        let _handle = registry.register_provider(descriptor("p"), stream::iter([view]).boxed());
        assert!(matches!(registry.get("p").unwrap().state, PanelState::Pending));

        let title = |registry: &ViewRegistry| {
            registry
                .get("p")
                .and_then(|entry| entry.state.view().map(|view| view.title.clone()))
        };
        runtime.block_on(async {
            for _ in 0..100 {
                if title(&registry).is_some() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        assert_eq!(title(&registry).as_deref(), Some("A"));
    }
}
