//! Location providers keyed by id.
//!
//! Extensions register providers that turn a document position into
//! candidate locations (definitions, references and so on). Panels name a
//! provider id and the bridge looks locations up through the registry.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use lsp_types::{Location, TextDocumentPositionParams};

use conduit_core::{ReplayLatest, Unsubscribable};

/// One location result. `None` means "no locations".
pub type Locations = Option<Vec<Location>>;

/// Stream of location results from a provider.
pub type LocationStream = BoxStream<'static, Result<Locations, LocationError>>;

/// Location lookup errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocationError {
    #[error("Location provider {provider:?} failed: {message}")]
    Provider { provider: String, message: String },
}

/// Computes locations for a document position.
pub trait LocationProvider: Send + Sync {
    fn provide_locations(&self, params: &TextDocumentPositionParams) -> LocationStream;
}

impl<F> LocationProvider for F
where
    F: Fn(&TextDocumentPositionParams) -> LocationStream + Send + Sync,
{
    fn provide_locations(&self, params: &TextDocumentPositionParams) -> LocationStream {
        self(params)
    }
}

/// Looks up locations through the provider registered under an id.
pub trait TextDocumentLocationProviderIdRegistry: Send + Sync {
    fn get_locations(&self, id: &str, params: TextDocumentPositionParams) -> LocationStream;
}

struct ProviderEntry {
    id: String,
    provider: Arc<dyn LocationProvider>,
}

type ProviderList = Arc<[Arc<ProviderEntry>]>;

/// In-memory [`TextDocumentLocationProviderIdRegistry`].
///
/// When several providers share an id, the most recently registered one
/// answers.
#[derive(Clone)]
pub struct LocationProviderRegistry {
    providers: ReplayLatest<ProviderList>,
}

impl LocationProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: ReplayLatest::with_value(Vec::new().into()),
        }
    }

    /// Registers `provider` under `id`.
    pub fn register_provider(
        &self,
        id: impl Into<String>,
        provider: impl LocationProvider + 'static,
    ) -> LocationProviderRegistration {
        let entry = Arc::new(ProviderEntry {
            id: id.into(),
            provider: Arc::new(provider),
        });
        self.providers.update(|current| {
            let mut next = current.map(|list| list.to_vec()).unwrap_or_default();
            next.push(Arc::clone(&entry));
            Some(next.into())
        });
        tracing::debug!(provider = %entry.id, "Registered location provider");

        LocationProviderRegistration {
            providers: self.providers.clone(),
            entry: Mutex::new(Some(entry)),
        }
    }

    fn find(&self, id: &str) -> Option<Arc<dyn LocationProvider>> {
        let providers = self.providers.get()?;
        providers
            .iter()
            .rev()
            .find(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.provider))
    }
}

impl Default for LocationProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDocumentLocationProviderIdRegistry for LocationProviderRegistry {
    fn get_locations(&self, id: &str, params: TextDocumentPositionParams) -> LocationStream {
        match self.find(id) {
            Some(provider) => provider.provide_locations(&params),
            None => {
                tracing::debug!(provider = %id, "No location provider registered");
                stream::once(future::ready(Ok(None))).boxed()
            }
        }
    }
}

/// Handle returned by [`LocationProviderRegistry::register_provider`].
#[must_use = "dropping the handle leaves the provider registered with no way to remove it"]
pub struct LocationProviderRegistration {
    providers: ReplayLatest<ProviderList>,
    entry: Mutex<Option<Arc<ProviderEntry>>>,
}

impl Unsubscribable for LocationProviderRegistration {
    fn unsubscribe(&self) {
        let Some(entry) = self
            .entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        self.providers.update(|current| {
            let next: Vec<_> = current?
                .iter()
                .filter(|e| !Arc::ptr_eq(e, &entry))
                .cloned()
                .collect();
            Some(next.into())
        });
        tracing::debug!(provider = %entry.id, "Unregistered location provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::uri;
    use futures::FutureExt;
    use lsp_types::{Position, Range, TextDocumentIdentifier};

    fn params() -> TextDocumentPositionParams {
        TextDocumentPositionParams::new(
            TextDocumentIdentifier::new(uri("file:///a.rs")),
            Position::new(2, 4),
        )
    }

    fn fixed(line: u32) -> impl LocationProvider {
        move |params: &TextDocumentPositionParams| -> LocationStream {
            let location = Location::new(
                params.text_document.uri.clone(),
                Range::new(Position::new(line, 0), Position::new(line, 1)),
            );
            stream::once(future::ready(Ok(Some(vec![location])))).boxed()
        }
    }

    fn first_line(registry: &LocationProviderRegistry, id: &str) -> Option<u32> {
        let mut results = registry.get_locations(id, params());
        let locations = results.next().now_or_never().flatten()?.ok()??;
        Some(locations[0].range.start.line)
    }

    #[test]
    fn test_unknown_id_yields_no_locations() {
        let registry = LocationProviderRegistry::new();
        let mut results = registry.get_locations("missing", params());
        assert!(matches!(results.next().now_or_never(), Some(Some(Ok(None)))));
        assert!(matches!(results.next().now_or_never(), Some(None)));
    }

    #[test]
    fn test_latest_registration_wins_until_removed() {
        let registry = LocationProviderRegistry::new();
        let _older = registry.register_provider("refs", fixed(1));
        let newer = registry.register_provider("refs", fixed(2));
        assert_eq!(first_line(&registry, "refs"), Some(2));

        newer.unsubscribe();
        newer.unsubscribe();
        assert_eq!(first_line(&registry, "refs"), Some(1));
    }
}
