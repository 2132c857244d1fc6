//! Path subscription registry
//!
//! [`StreamRegistry`] is the entry point of the crate. It maps normalized paths
//! to handler groups and subscription handles to their paths, and it decides
//! when a stream connection is started or told to stop. Both maps sit behind a
//! single mutex so that concurrent `subscribe` calls for one path can never
//! start two connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::StreamConfig;
use crate::connection::{ConnectionHandle, ConnectionState, StreamConnection};
use crate::dispatch::{DeliveryContext, Dispatcher};
use crate::error::{HandlerResult, Result, StreamError};
use crate::event::Event;
use crate::group::{EventCallback, HandlerGroup, SubscriptionHandle};
use crate::observer::{NoopObserver, StreamObserver};
use crate::path::SubscriptionPath;
use crate::transport::{CredentialProvider, NoCredentials, StreamOpener};

/// A live path: its handlers and the connection serving them
struct PathEntry {
    group: Arc<HandlerGroup>,
    connection: ConnectionHandle,
}

#[derive(Default)]
struct RegistryState {
    paths: HashMap<SubscriptionPath, PathEntry>,
    handles: HashMap<SubscriptionHandle, SubscriptionPath>,
    shut_down: bool,
}

/// Multiplexes any number of callbacks over one stream connection per path
pub struct StreamRegistry {
    state: Mutex<RegistryState>,
    opener: Arc<dyn StreamOpener>,
    credentials: Arc<dyn CredentialProvider>,
    dispatcher: Dispatcher,
    observer: Arc<dyn StreamObserver>,
    config: StreamConfig,
    runtime: Handle,
}

impl StreamRegistry {
    /// Start building a registry that opens streams with `opener`
    pub fn builder(opener: Arc<dyn StreamOpener>) -> StreamRegistryBuilder {
        StreamRegistryBuilder::new(opener)
    }

    /// Registry with default configuration, no credentials and inline
    /// delivery, running on the current tokio runtime
    pub fn new(opener: Arc<dyn StreamOpener>) -> Result<Self> {
        Self::builder(opener).build()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Register `callback` for every event on `path`.
    ///
    /// The first subscriber of a path starts its connection; later subscribers
    /// share it. Connection problems are reported to the observer, never here.
    pub fn subscribe<F>(
        &self,
        path: impl Into<SubscriptionPath>,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_callback(path, Arc::new(callback))
    }

    /// Same as [`subscribe`](Self::subscribe) for an already shared callback
    pub fn subscribe_callback(
        &self,
        path: impl Into<SubscriptionPath>,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        let path = path.into();
        let mut state = self.state.lock();

        if state.shut_down {
            return Err(StreamError::Shutdown);
        }

        let handle = SubscriptionHandle::new();

        if let Some(entry) = state.paths.get(&path) {
            entry.group.add(handle, callback);
            if entry.connection.state().is_terminal() {
                tracing::debug!(
                    "Subscribed {} to {} whose connection has already closed",
                    handle,
                    path
                );
            }
        } else {
            if let Some(max_connections) = self.config.max_connections {
                if state.paths.len() >= max_connections {
                    return Err(StreamError::ConnectionLimit { max_connections });
                }
            }

            let group = Arc::new(HandlerGroup::new(path.clone()));
            // Registered before the task starts so its first check sees a handler
            group.add(handle, callback);

            let connection = StreamConnection {
                path: path.clone(),
                group: Arc::clone(&group),
                opener: Arc::clone(&self.opener),
                credentials: Arc::clone(&self.credentials),
                dispatcher: self.dispatcher.clone(),
                observer: Arc::clone(&self.observer),
                config: self.config.clone(),
            }
            .spawn(&self.runtime);

            tracing::info!("Opening event stream for {}", path);
            state
                .paths
                .insert(path.clone(), PathEntry { group, connection });
        }

        state.handles.insert(handle, path.clone());
        tracing::debug!("Subscribed {} to {}", handle, path);

        Ok(handle)
    }

    /// Remove the callback registered under `handle`.
    ///
    /// Returns `false` for unknown or already removed handles. Removing the
    /// last callback of a path closes its connection.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut state = self.state.lock();

        let Some(path) = state.handles.remove(&handle) else {
            return false;
        };

        let emptied = match state.paths.get(&path) {
            Some(entry) => {
                entry.group.remove(handle);
                entry.group.is_empty()
            }
            None => false,
        };

        if emptied {
            if let Some(entry) = state.paths.remove(&path) {
                entry.group.close();
                tracing::info!("Last subscriber left {}, closing event stream", path);
            }
        }

        tracing::debug!("Unsubscribed {} from {}", handle, path);
        true
    }

    /// Number of callbacks registered for `path`
    pub fn handler_count(&self, path: impl Into<SubscriptionPath>) -> usize {
        let path = path.into();
        self.state
            .lock()
            .paths
            .get(&path)
            .map(|entry| entry.group.len())
            .unwrap_or(0)
    }

    /// Paths that currently have at least one subscriber, sorted
    pub fn active_paths(&self) -> Vec<SubscriptionPath> {
        let mut paths: Vec<_> = self.state.lock().paths.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Whether `handle` is still registered
    pub fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.state.lock().handles.contains_key(&handle)
    }

    /// State of the connection serving `path`, if the path has subscribers
    pub fn connection_state(&self, path: impl Into<SubscriptionPath>) -> Option<ConnectionState> {
        let path = path.into();
        self.state
            .lock()
            .paths
            .get(&path)
            .map(|entry| entry.connection.state())
    }

    /// Follow the state transitions of the connection serving `path`
    pub fn watch_connection(
        &self,
        path: impl Into<SubscriptionPath>,
    ) -> Option<watch::Receiver<ConnectionState>> {
        let path = path.into();
        self.state
            .lock()
            .paths
            .get(&path)
            .map(|entry| entry.connection.watch())
    }

    /// Close every connection and reject further subscriptions
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        let closing = state.paths.len();
        for (_, entry) in state.paths.drain() {
            // Reads already in flight and queued jobs must find no callbacks
            entry.group.clear();
            entry.group.close();
        }
        state.handles.clear();

        tracing::info!("Stream registry shut down, closed {} event streams", closing);
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`StreamRegistry`]
pub struct StreamRegistryBuilder {
    opener: Arc<dyn StreamOpener>,
    credentials: Arc<dyn CredentialProvider>,
    context: Option<Arc<dyn DeliveryContext>>,
    observer: Arc<dyn StreamObserver>,
    config: StreamConfig,
    runtime: Option<Handle>,
}

impl StreamRegistryBuilder {
    fn new(opener: Arc<dyn StreamOpener>) -> Self {
        Self {
            opener,
            credentials: Arc::new(NoCredentials),
            context: None,
            observer: Arc::new(NoopObserver),
            config: StreamConfig::default(),
            runtime: None,
        }
    }

    /// Token source consulted each time a connection opens
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Deliver events through `context` instead of on the connection task
    pub fn context(mut self, context: Arc<dyn DeliveryContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime that hosts connection tasks. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<StreamRegistry> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| StreamError::NoRuntime(e.to_string()))?,
        };

        Ok(StreamRegistry {
            state: Mutex::new(RegistryState::default()),
            dispatcher: Dispatcher::new(self.context, Arc::clone(&self.observer)),
            opener: self.opener,
            credentials: self.credentials,
            observer: self.observer,
            config: self.config,
            runtime,
        })
    }
}
