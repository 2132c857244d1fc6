//! Event delivery to handler groups
//!
//! The [`Dispatcher`] hands each decoded event to every callback of a group.
//! Without a [`DeliveryContext`] callbacks run synchronously on the connection
//! task. With one, each event becomes a single job posted to the context, so a
//! FIFO context keeps the per-connection arrival order.

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::event::Event;
use crate::group::HandlerGroup;
use crate::observer::StreamObserver;

/// Unit of work posted to a delivery context
pub type DeliveryJob = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that runs delivery jobs, e.g. a UI thread's queue.
pub trait DeliveryContext: Send + Sync {
    fn post(&self, job: DeliveryJob);
}

impl<F> DeliveryContext for F
where
    F: Fn(DeliveryJob) + Send + Sync,
{
    fn post(&self, job: DeliveryJob) {
        self(job)
    }
}

/// Delivers events to handler groups
#[derive(Clone)]
pub struct Dispatcher {
    context: Option<Arc<dyn DeliveryContext>>,
    observer: Arc<dyn StreamObserver>,
}

impl Dispatcher {
    pub fn new(
        context: Option<Arc<dyn DeliveryContext>>,
        observer: Arc<dyn StreamObserver>,
    ) -> Self {
        Self { context, observer }
    }

    /// Whether deliveries are posted rather than run inline
    pub fn is_posting(&self) -> bool {
        self.context.is_some()
    }

    /// Deliver `event` to the callbacks registered when delivery runs
    pub fn dispatch(&self, group: &Arc<HandlerGroup>, event: Event) {
        match &self.context {
            Some(context) => {
                let group = Arc::clone(group);
                let observer = Arc::clone(&self.observer);
                context.post(Box::new(move || {
                    deliver(&group, &event, observer.as_ref());
                }));
            }
            None => {
                deliver(group, &event, self.observer.as_ref());
            }
        }
    }
}

/// Run every callback in a fresh snapshot of `group`.
///
/// A failing callback is reported and skipped. Delivery stops as soon as the
/// group is closed, since none of its handles are registered any more.
/// Returns the number of callbacks that completed successfully.
pub(crate) fn deliver(group: &HandlerGroup, event: &Event, observer: &dyn StreamObserver) -> usize {
    let mut delivered = 0;

    for entry in group.snapshot() {
        if group.is_closed() {
            tracing::trace!("Dropping '{}' for closed path {}", event.name, group.path());
            break;
        }

        match entry.invoke(event) {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    "Handler {} on {} failed for event '{}': {}",
                    entry.handle(),
                    group.path(),
                    event.name,
                    e
                );
                observer.on_handler_error(group.path(), entry.handle(), &e);
            }
        }
    }

    delivered
}

/// Delivery context backed by one dedicated worker thread.
///
/// Jobs run in the order they were posted. Dropping the context lets queued
/// jobs finish and then joins the worker.
pub struct ThreadContext {
    sender: Mutex<Option<mpsc::Sender<DeliveryJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadContext {
    /// Spawn the worker thread under the given name
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<DeliveryJob>();

        let worker = thread::Builder::new().name(name.into()).spawn(move || {
            tracing::debug!("Delivery thread started");
            for job in receiver {
                job();
            }
            tracing::debug!("Delivery thread stopped");
        })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl DeliveryContext for ThreadContext {
    fn post(&self, job: DeliveryJob) {
        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send(job).is_err() {
                tracing::debug!("Delivery thread gone, dropping event delivery");
            }
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.sender.lock().take();

        if let Some(worker) = self.worker.lock().take() {
            // The last reference can be released by a job on the worker itself
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
