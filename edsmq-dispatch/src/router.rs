//! Convention-based fan-out of result entries to subscribers.
//!
//! For an entry produced by `{api}/{endpoint}` the router looks, on every
//! subscriber, for the first handler that exists among
//!
//! 1. `response_{api}_{endpoint}`
//! 2. `response_{api}`
//! 3. `response`
//!
//! with `-` replaced by `_` in both `api` and `endpoint`. A handler that
//! returns [`HandlerOutcome::Handled`] ends the search for that subscriber
//! only; every other subscriber is still consulted. Subscribers are visited
//! in registration order.
//!
//! ## Failing handlers
//! Under [`HandlerErrorPolicy::LogAndContinue`] an error or panic inside a
//! handler is logged, the rest of that subscriber's chain is skipped and
//! routing moves on to the next subscriber. [`HandlerErrorPolicy::Abort`]
//! returns the failure to the caller instead.
//!
//! Panics are caught with `AssertUnwindSafe`; a handler that panics while
//! holding a lock may leave its own state poisoned.

use crate::dispatcher::Dispatcher;
use crate::request::ResultEntry;
use crate::subscriber::{BoxError, HandlerOutcome, Subscribe, SubscriberSource};
use crate::transport::Transport;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace};

/// Name of the catch-all handler and prefix of every other handler name.
pub const HANDLER_PREFIX: &str = "response";

fn normalize(part: &str) -> String {
    part.replace('-', "_")
}

/// `response_{api}_{endpoint}` with dashes turned into underscores.
pub fn endpoint_handler(api: &str, endpoint: &str) -> String {
    format!(
        "{HANDLER_PREFIX}_{}_{}",
        normalize(api),
        normalize(endpoint)
    )
}

/// `response_{api}` with dashes turned into underscores.
pub fn api_handler(api: &str) -> String {
    format!("{HANDLER_PREFIX}_{}", normalize(api))
}

/// Candidate handler names from most to least specific.
pub fn candidate_handlers(api: &str, endpoint: &str) -> [String; 3] {
    [
        endpoint_handler(api, endpoint),
        api_handler(api),
        HANDLER_PREFIX.to_string(),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerErrorPolicy {
    #[default]
    LogAndContinue,
    Abort,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("handler `{handler}` of subscriber `{subscriber}` failed: {source}")]
    Handler {
        subscriber: String,
        handler: String,
        #[source]
        source: BoxError,
    },
    #[error("handler `{handler}` of subscriber `{subscriber}` panicked: {message}")]
    HandlerPanicked {
        subscriber: String,
        handler: String,
        message: String,
    },
}

/// Outcome of routing a single entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handler calls that returned normally.
    pub invoked: usize,
    /// Handler calls that returned an error or panicked.
    pub failed: usize,
}

/// Handlers one subscriber would be offered for a given `{api}/{endpoint}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerUsage {
    pub subscriber: String,
    pub handlers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router {
    policy: HandlerErrorPolicy,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: HandlerErrorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> HandlerErrorPolicy {
        self.policy
    }

    /// Offers one entry to every subscriber.
    pub fn dispatch(
        &self,
        entry: &ResultEntry,
        subscribers: &[Arc<dyn Subscribe>],
    ) -> Result<Delivery, RouterError> {
        let request = &entry.request;
        let candidates = candidate_handlers(request.api(), request.endpoint());
        let mut delivery = Delivery::default();

        'subscribers: for sub in subscribers {
            for handler in &candidates {
                if !sub.has_handler(handler) {
                    continue;
                }

                trace!(subscriber = sub.name(), handler = %handler, "edsmq.router.invoke");
                let called =
                    catch_unwind(AssertUnwindSafe(|| sub.invoke(handler, request, &entry.reply)));

                let failure = match called {
                    Ok(None) => continue,
                    Ok(Some(Ok(HandlerOutcome::Handled))) => {
                        delivery.invoked += 1;
                        continue 'subscribers;
                    }
                    Ok(Some(Ok(HandlerOutcome::Continue))) => {
                        delivery.invoked += 1;
                        continue;
                    }
                    Ok(Some(Err(source))) => RouterError::Handler {
                        subscriber: sub.name().to_string(),
                        handler: handler.clone(),
                        source,
                    },
                    Err(payload) => RouterError::HandlerPanicked {
                        subscriber: sub.name().to_string(),
                        handler: handler.clone(),
                        message: panic_message(payload.as_ref()),
                    },
                };

                delivery.failed += 1;
                match self.policy {
                    HandlerErrorPolicy::Abort => return Err(failure),
                    HandlerErrorPolicy::LogAndContinue => {
                        error!(
                            api = request.api(),
                            endpoint = request.endpoint(),
                            error = %failure,
                            "edsmq.router.handler_failed"
                        );
                        continue 'subscribers;
                    }
                }
            }
        }

        debug!(
            api = request.api(),
            endpoint = request.endpoint(),
            invoked = delivery.invoked,
            failed = delivery.failed,
            "edsmq.router.dispatched"
        );
        Ok(delivery)
    }

    /// Routes every buffered result, oldest first, and returns how many
    /// entries were consumed.
    ///
    /// The subscriber set is re-read for every entry. Under
    /// [`HandlerErrorPolicy::Abort`] the failing entry is consumed and the
    /// remaining ones stay buffered.
    pub fn drain<T: Transport>(
        &self,
        dispatcher: &Dispatcher<T>,
        source: &dyn SubscriberSource,
    ) -> Result<usize, RouterError> {
        let mut drained = 0;
        while let Some(entry) = dispatcher.get_response() {
            drained += 1;
            let subscribers = source.subscribers();
            self.dispatch(&entry, &subscribers)?;
        }
        Ok(drained)
    }

    /// Which handlers each subscriber exposes for `{api}/{endpoint}`, most
    /// specific first. Subscribers exposing none are left out.
    pub fn usage(
        &self,
        api: &str,
        endpoint: &str,
        subscribers: &[Arc<dyn Subscribe>],
    ) -> Vec<HandlerUsage> {
        let candidates = candidate_handlers(api, endpoint);
        subscribers
            .iter()
            .filter_map(|sub| {
                let handlers: Vec<String> = candidates
                    .iter()
                    .filter(|h| sub.has_handler(h))
                    .cloned()
                    .collect();
                (!handlers.is_empty()).then(|| HandlerUsage {
                    subscriber: sub.name().to_string(),
                    handlers,
                })
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
