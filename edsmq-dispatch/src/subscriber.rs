//! Subscribers and the registry the router reads them from.
//!
//! A subscriber exposes handlers by name. The router only ever asks two
//! questions: does this subscriber have a handler called `X`, and what does
//! calling it return.

use crate::request::{Reply, Request};
use crate::router::{api_handler, endpoint_handler, HANDLER_PREFIX};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<HandlerOutcome, BoxError>;

/// What a handler reports back to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Stop trying less specific handlers on this subscriber.
    Handled,
    /// Also offer the entry to the next, less specific handler.
    Continue,
}

impl From<bool> for HandlerOutcome {
    fn from(handled: bool) -> Self {
        if handled {
            HandlerOutcome::Handled
        } else {
            HandlerOutcome::Continue
        }
    }
}

pub trait Subscribe: Send + Sync {
    fn name(&self) -> &str;

    fn has_handler(&self, handler: &str) -> bool;

    /// `None` when the subscriber has no handler of that name.
    fn invoke(&self, handler: &str, request: &Request, reply: &Reply) -> Option<HandlerResult>;

    /// Handler names, for diagnostics.
    fn handler_names(&self) -> Vec<String> {
        Vec::new()
    }
}

type Handler = Box<dyn Fn(&Request, &Reply) -> HandlerResult + Send + Sync>;

/// Closure-backed [`Subscribe`] implementation.
///
/// ```
/// use edsmq_dispatch::{HandlerOutcome, Subscribe, Subscriber};
///
/// let sub = Subscriber::new("progress")
///     .on_endpoint("api-system-v1", "bodies", |_, _| Ok(HandlerOutcome::Handled))
///     .on_any(|_, _| Ok(HandlerOutcome::Continue));
/// assert!(sub.has_handler("response_api_system_v1_bodies"));
/// assert!(sub.has_handler("response"));
/// assert!(!sub.has_handler("response_api_system_v1"));
/// ```
pub struct Subscriber {
    name: String,
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl Subscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under an explicit name, replacing any previous one.
    pub fn on<F>(mut self, handler: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Request, &Reply) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(handler.into(), Box::new(f));
        self
    }

    /// Handler for one endpoint of one API family.
    pub fn on_endpoint<F>(self, api: &str, endpoint: &str, f: F) -> Self
    where
        F: Fn(&Request, &Reply) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(endpoint_handler(api, endpoint), f)
    }

    /// Handler for every endpoint of an API family.
    pub fn on_api<F>(self, api: &str, f: F) -> Self
    where
        F: Fn(&Request, &Reply) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(api_handler(api), f)
    }

    /// Catch-all handler.
    pub fn on_any<F>(self, f: F) -> Self
    where
        F: Fn(&Request, &Reply) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(HANDLER_PREFIX, f)
    }
}

impl Subscribe for Subscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_handler(&self, handler: &str) -> bool {
        self.handlers.contains_key(handler)
    }

    fn invoke(&self, handler: &str, request: &Request, reply: &Reply) -> Option<HandlerResult> {
        self.handlers.get(handler).map(|h| h(request, reply))
    }

    fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Supplies the subscriber set the router fans out to.
///
/// The router takes a fresh snapshot for every result entry, so
/// registrations made between entries are honoured.
pub trait SubscriberSource {
    fn subscribers(&self) -> Vec<Arc<dyn Subscribe>>;
}

impl SubscriberSource for Vec<Arc<dyn Subscribe>> {
    fn subscribers(&self) -> Vec<Arc<dyn Subscribe>> {
        self.clone()
    }
}

impl SubscriberSource for [Arc<dyn Subscribe>] {
    fn subscribers(&self) -> Vec<Arc<dyn Subscribe>> {
        self.to_vec()
    }
}

/// Ordered, shareable list of subscribers. Names are unique; registering
/// a name twice replaces the earlier subscriber in place.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<Vec<Arc<dyn Subscribe>>>>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.names())
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Subscribe + 'static>(&self, subscriber: S) -> Arc<dyn Subscribe> {
        let subscriber: Arc<dyn Subscribe> = Arc::new(subscriber);
        self.register_arc(Arc::clone(&subscriber));
        subscriber
    }

    pub fn register_arc(&self, subscriber: Arc<dyn Subscribe>) {
        let mut list = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match list.iter_mut().find(|s| s.name() == subscriber.name()) {
            Some(slot) => *slot = subscriber,
            None => list.push(subscriber),
        }
    }

    /// Returns `true` when a subscriber of that name was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut list = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|s| s.name() != name);
        list.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Subscribe>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriberSource for SubscriberRegistry {
    fn subscribers(&self) -> Vec<Arc<dyn Subscribe>> {
        self.snapshot()
    }
}
