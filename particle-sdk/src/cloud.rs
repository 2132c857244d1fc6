//! The cloud client
//!
//! [`ParticleCloud`] ties the stream registry to the cloud API: it scopes
//! subscriptions to event feeds, supplies the access token, publishes events
//! and tells the application when the cloud stops accepting its token.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use particle_stream::{
    CloseReason, ConnectionState, CredentialProvider, DeliveryContext, Event, HandlerError,
    HandlerResult, NoCredentials, ProtocolError, StaticToken, StreamObserver, StreamOpener,
    StreamRegistry, SubscriptionHandle, SubscriptionPath,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use url::Url;

use crate::config::CloudConfig;
use crate::error::{Result, SdkError};
use crate::http::HttpStreamOpener;
use crate::scope::{EventScope, API_VERSION};

/// Event a device publishes when its cloud connection changes
pub const STATUS_EVENT: &str = "spark/status";
/// `STATUS_EVENT` data once the device is connected
pub const STATUS_ONLINE: &str = "online";

type UnauthorizedCallback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks run whenever the cloud answers 401
#[derive(Default)]
struct UnauthorizedHooks {
    callbacks: RwLock<Vec<UnauthorizedCallback>>,
}

impl UnauthorizedHooks {
    fn add(&self, callback: UnauthorizedCallback) {
        self.callbacks.write().push(callback);
    }

    fn fire(&self) {
        tracing::warn!("Cloud rejected the access token");
        let callbacks = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::error!("Unauthorized hook #{} panicked", index);
            }
        }
    }
}

/// Forwards stream diagnostics and turns 401 closes into hook calls
struct CloudObserver {
    hooks: Arc<UnauthorizedHooks>,
    inner: Option<Arc<dyn StreamObserver>>,
}

impl StreamObserver for CloudObserver {
    fn on_state_change(&self, path: &SubscriptionPath, state: ConnectionState) {
        if let Some(inner) = &self.inner {
            inner.on_state_change(path, state);
        }
    }

    fn on_protocol_error(&self, path: &SubscriptionPath, error: &ProtocolError) {
        if let Some(inner) = &self.inner {
            inner.on_protocol_error(path, error);
        }
    }

    fn on_handler_error(
        &self,
        path: &SubscriptionPath,
        handle: SubscriptionHandle,
        error: &HandlerError,
    ) {
        if let Some(inner) = &self.inner {
            inner.on_handler_error(path, handle, error);
        }
    }

    fn on_connection_closed(&self, path: &SubscriptionPath, reason: &CloseReason) {
        if reason.is_unauthorized() {
            self.hooks.fire();
        }
        if let Some(inner) = &self.inner {
            inner.on_connection_closed(path, reason);
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    ok: bool,
}

/// Client for the Particle device cloud's event feed
///
/// # Example
///
/// ```rust,ignore
/// use particle_sdk::ParticleCloud;
///
/// let cloud = ParticleCloud::builder().access_token("token").build()?;
///
/// let handle = cloud.subscribe_to_my_devices_events_with_prefix("temp", |event| {
///     println!("{}: {}", event.device_id, event.data);
///     Ok(())
/// })?;
///
/// cloud.publish_event("reset", "", true, 60).await?;
/// cloud.unsubscribe_from_event(handle);
/// ```
pub struct ParticleCloud {
    registry: Arc<StreamRegistry>,
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    hooks: Arc<UnauthorizedHooks>,
    config: CloudConfig,
}

impl ParticleCloud {
    pub fn builder() -> ParticleCloudBuilder {
        ParticleCloudBuilder::new()
    }

    /// Client with default configuration using `access_token`
    pub fn with_token(access_token: impl Into<String>) -> Result<Self> {
        Self::builder().access_token(access_token).build()
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// The underlying registry, for introspection
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Follow every event in `scope`, optionally narrowed by an event name
    /// prefix
    pub fn subscribe<F>(
        &self,
        scope: &EventScope,
        prefix: &str,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        if let EventScope::Device(id) = scope {
            if id.trim().is_empty() {
                return Err(SdkError::InvalidArgument(
                    "device id must not be blank".to_string(),
                ));
            }
        }

        Ok(self.registry.subscribe(scope.path(prefix), handler)?)
    }

    /// Follow all public events
    pub fn subscribe_to_all_events_with_prefix<F>(
        &self,
        prefix: &str,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(&EventScope::All, prefix, handler)
    }

    /// Follow events from the caller's own devices
    pub fn subscribe_to_my_devices_events_with_prefix<F>(
        &self,
        prefix: &str,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(&EventScope::MyDevices, prefix, handler)
    }

    /// Follow events from one device
    pub fn subscribe_to_device_events_with_prefix<F>(
        &self,
        device_id: &str,
        prefix: &str,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(&EventScope::Device(device_id.to_string()), prefix, handler)
    }

    /// Stop delivering to `handle`. Returns `false` if it was not subscribed.
    pub fn unsubscribe_from_event(&self, handle: SubscriptionHandle) -> bool {
        self.registry.unsubscribe(handle)
    }

    /// Run `callback` whenever the cloud rejects the access token, on a
    /// stream or a request
    pub fn on_unauthorized<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.add(Arc::new(callback));
    }

    /// Publish an event to the caller's event feed.
    ///
    /// Returns the cloud's `ok` flag.
    pub async fn publish_event(
        &self,
        name: &str,
        data: &str,
        private: bool,
        ttl: u32,
    ) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(SdkError::InvalidArgument(
                "event name must not be blank".to_string(),
            ));
        }

        let url = self.base_url.join(&format!("{}/devices/events", API_VERSION))?;
        let ttl = ttl.to_string();
        let form = [
            ("name", name),
            ("data", data),
            ("private", if private { "true" } else { "false" }),
            ("ttl", ttl.as_str()),
        ];

        let mut request = self
            .client
            .post(url)
            .timeout(self.config.request_timeout)
            .form(&form);
        if let Some(token) = self.credentials.access_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.hooks.fire();
            return Err(SdkError::Unauthorized);
        }
        if !status.is_success() {
            return Err(SdkError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let result: PublishResponse = serde_json::from_str(&body)
            .map_err(|e| SdkError::InvalidResponse(e.to_string()))?;

        tracing::debug!("Published '{}' (ok: {})", name, result.ok);
        Ok(result.ok)
    }

    /// Resolve once `device_id` reports itself online.
    ///
    /// Subscribes to the device's feed and waits for a `spark/status` event
    /// with data `online`. The subscription is removed when the event arrives
    /// or the returned future is dropped. Fails with
    /// [`SdkError::WatcherClosed`] if the client shuts down first.
    pub async fn wait_for_device_online(&self, device_id: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let own_handle: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let registry: Weak<StreamRegistry> = Arc::downgrade(&self.registry);
        let slot = Arc::clone(&own_handle);
        let handle = self.subscribe_to_device_events_with_prefix(device_id, "", move |event| {
            if event.name != STATUS_EVENT || event.data != STATUS_ONLINE {
                return Ok(());
            }

            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
            let handle = *slot.lock();
            if let (Some(registry), Some(handle)) = (registry.upgrade(), handle) {
                registry.unsubscribe(handle);
            }
            Ok(())
        })?;
        *own_handle.lock() = Some(handle);

        let _guard = SubscriptionGuard {
            registry: Arc::clone(&self.registry),
            handle,
        };

        tracing::debug!("Waiting for device {} to come online", device_id);
        rx.await.map_err(|_| SdkError::WatcherClosed)
    }

    /// Close every event stream. Also happens when the client is dropped.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

/// Removes a subscription when dropped
struct SubscriptionGuard {
    registry: Arc<StreamRegistry>,
    handle: SubscriptionHandle,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.handle);
    }
}

impl Drop for ParticleCloud {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

/// Builder for [`ParticleCloud`]
pub struct ParticleCloudBuilder {
    config: CloudConfig,
    credentials: Arc<dyn CredentialProvider>,
    opener: Option<Arc<dyn StreamOpener>>,
    context: Option<Arc<dyn DeliveryContext>>,
    observer: Option<Arc<dyn StreamObserver>>,
    runtime: Option<Handle>,
}

impl Default for ParticleCloudBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleCloudBuilder {
    pub fn new() -> Self {
        Self {
            config: CloudConfig::default(),
            credentials: Arc::new(NoCredentials),
            opener: None,
            context: None,
            observer: None,
            runtime: None,
        }
    }

    pub fn config(mut self, config: CloudConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a fixed access token
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Arc::new(StaticToken::new(token));
        self
    }

    /// Token source consulted whenever a stream opens or a request is sent
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the HTTP stream transport
    pub fn opener(mut self, opener: Arc<dyn StreamOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Deliver events through `context`, e.g. a [`ThreadContext`](particle_stream::ThreadContext)
    pub fn context(mut self, context: Arc<dyn DeliveryContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Receive stream diagnostics in addition to the log output
    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runtime hosting stream tasks. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ParticleCloud> {
        self.config.validate()?;
        let base_url = self.config.base_url()?;

        let client = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .build()?;

        let opener = match self.opener {
            Some(opener) => opener,
            None => Arc::new(HttpStreamOpener::with_client(
                client.clone(),
                base_url.clone(),
            )),
        };

        let hooks = Arc::new(UnauthorizedHooks::default());
        let observer = Arc::new(CloudObserver {
            hooks: Arc::clone(&hooks),
            inner: self.observer,
        });

        let mut registry = StreamRegistry::builder(opener)
            .credentials(Arc::clone(&self.credentials))
            .observer(observer)
            .config(self.config.stream.clone());
        if let Some(context) = self.context {
            registry = registry.context(context);
        }
        if let Some(runtime) = self.runtime {
            registry = registry.runtime(runtime);
        }

        tracing::debug!("Particle cloud client for {}", base_url);

        Ok(ParticleCloud {
            registry: Arc::new(registry.build()?),
            client,
            base_url,
            credentials: self.credentials,
            hooks,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let hooks = UnauthorizedHooks::default();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let calls = Arc::clone(&calls);
            hooks.add(Arc::new(move || calls.lock().push(tag)));
        }

        hooks.fire();
        assert_eq!(*calls.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_panicking_hook_does_not_stop_others() {
        let hooks = UnauthorizedHooks::default();
        let calls = Arc::new(AtomicUsize::new(0));

        hooks.add(Arc::new(|| panic!("hook failed")));
        let counter = Arc::clone(&calls);
        hooks.add(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hooks.fire();
        hooks.fire();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_fires_hooks_only_for_unauthorized_closes() {
        let hooks = Arc::new(UnauthorizedHooks::default());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        hooks.add(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let observer = CloudObserver {
            hooks,
            inner: None,
        };
        let path = SubscriptionPath::from("v1/events");

        observer.on_connection_closed(&path, &CloseReason::EndOfStream);
        observer.on_connection_closed(
            &path,
            &CloseReason::OpenFailed(particle_stream::ConnectionError::Status(500)),
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);

        observer.on_connection_closed(
            &path,
            &CloseReason::OpenFailed(particle_stream::ConnectionError::Unauthorized),
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_arguments_rejected() {
        let cloud = ParticleCloud::with_token("token").unwrap();

        assert!(matches!(
            cloud.subscribe_to_device_events_with_prefix("  ", "", |_| Ok(())),
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(matches!(
            cloud.publish_event(" ", "data", true, 60).await,
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(cloud.registry().active_paths().is_empty());
    }
}
