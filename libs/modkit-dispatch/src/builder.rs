use crate::cache::ResponseCache;
use crate::cancel::CancellationRegistry;
use crate::client::Dispatcher;
use crate::config::{DispatcherConfig, RetryPolicy};
use crate::controller::{ErrorListeners, NoopController, RequestController};
use crate::dedup::DedupQueue;
use crate::error::BuildError;
use crate::headers::{DefaultHeaders, HeaderStore, MemoryHeaderStore};
use crate::orchestrator::Orchestrator;
use crate::transport::Transport;
use parking_lot::RwLock;
use std::sync::Arc;
use url::Url;

/// Builder for [`Dispatcher`].
///
/// A transport is required; everything else has a default:
/// - header store: [`MemoryHeaderStore`] (nothing persisted across restarts)
/// - controller: [`NoopController`]
/// - cache: none (cache ids on descriptors are ignored)
///
/// ```ignore
/// let dispatcher = Dispatcher::builder()
///     .base_url("https://api.example.com/v1")
///     .transport(Arc::new(HyperTransport::builder().build()?))
///     .header_store(Arc::new(FileHeaderStore::new(state_dir)))
///     .cache(Arc::new(MemoryCache::new(Duration::from_secs(60))))
///     .build()?;
/// ```
#[derive(Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn ResponseCache>>,
    header_store: Option<Arc<dyn HeaderStore>>,
    controller: Option<Arc<dyn RequestController>>,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one loaded from a file
    #[must_use]
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Replace the phrases that identify an expired session
    #[must_use]
    pub fn session_expired_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.session_expired_messages = messages.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.config.with_credentials = with_credentials;
        self
    }

    #[must_use]
    pub fn default_headers_key(mut self, key: impl Into<String>) -> Self {
        self.config.default_headers_key = key.into();
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn header_store(mut self, store: Arc<dyn HeaderStore>) -> Self {
        self.header_store = Some(store);
        self
    }

    #[must_use]
    pub fn controller(mut self, controller: Arc<dyn RequestController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Build the dispatcher, loading the persisted default headers.
    ///
    /// A header store that cannot be read is logged and treated as empty.
    ///
    /// # Errors
    /// Returns `BuildError::MissingTransport` if no transport was set, or
    /// `BuildError::InvalidBaseUrl` if the base URL is set but is not an
    /// absolute `http(s)` URL.
    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        if !self.config.base_url.is_empty() {
            validate_base_url(&self.config.base_url)?;
        }

        let store = self
            .header_store
            .unwrap_or_else(|| Arc::new(MemoryHeaderStore::new()));
        let controller = self
            .controller
            .unwrap_or_else(|| Arc::new(NoopController));
        let default_headers =
            DefaultHeaders::load(store, self.config.default_headers_key.clone());

        tracing::debug!(
            base_url = %self.config.base_url,
            max_retries = self.config.retry.max_retries,
            cache = self.cache.is_some(),
            "Dispatcher built"
        );

        Ok(Dispatcher::from_orchestrator(Orchestrator {
            config: self.config,
            transport,
            cache: self.cache,
            controller: RwLock::new(controller),
            default_headers,
            queue: DedupQueue::new(),
            registry: CancellationRegistry::new(),
            listeners: ErrorListeners::default(),
        }))
    }
}

fn validate_base_url(base_url: &str) -> Result<(), BuildError> {
    let invalid = |reason: String| BuildError::InvalidBaseUrl {
        url: base_url.to_owned(),
        reason,
    };

    let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::headers::HeaderMapping;
    use crate::response::ApiResponse;
    use crate::transport::TransportRequest;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct UnreachableTransport;

    #[async_trait]
    impl Transport for UnreachableTransport {
        async fn send(
            &self,
            _request: TransportRequest,
            _cancel: CancellationToken,
        ) -> Result<ApiResponse, TransportError> {
            Err(TransportError::InvalidRequest("unreachable".to_owned()))
        }
    }

    fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new().transport(Arc::new(UnreachableTransport))
    }

    #[test]
    fn test_transport_is_required() {
        assert!(matches!(
            DispatcherBuilder::new().build(),
            Err(BuildError::MissingTransport)
        ));
    }

    #[test]
    fn test_base_url_validation() {
        assert!(builder().build().is_ok());
        assert!(builder().base_url("https://api.example.com/v1").build().is_ok());

        for bad in ["not a url", "ftp://files.example.com", "/relative"] {
            assert!(
                matches!(builder().base_url(bad).build(), Err(BuildError::InvalidBaseUrl { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_persisted_headers_loaded_on_build() {
        let store = Arc::new(MemoryHeaderStore::new());
        let headers = HeaderMapping::from([("authorization".to_owned(), "Bearer t".to_owned())]);
        store.set("session", &headers).unwrap();

        let dispatcher = builder()
            .header_store(store)
            .default_headers_key("session")
            .build()
            .unwrap();
        assert_eq!(dispatcher.default_headers(), headers);
    }

    #[test]
    fn test_setters_update_config() {
        let dispatcher = builder()
            .retry(RetryPolicy::disabled())
            .session_expired_messages(["Login required"])
            .with_credentials(false)
            .build()
            .unwrap();

        let config = dispatcher.config();
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.session_expired_messages, vec!["Login required".to_owned()]);
        assert!(!config.with_credentials);
    }
}
