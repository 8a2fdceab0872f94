//! Throttled, retried EDSM request dispatch with convention-routed fan-out.
//!
//! Producers enqueue fire-and-forget [`Request`]s on a [`Dispatcher`]. A
//! single worker task drains them in FIFO order, performs the HTTP call
//! through a [`Transport`] (up to `max_attempts` tries), parks successful
//! replies in a [`ResultBuffer`] and pokes the host through a ready hook.
//! The host then drains the buffer through a [`Router`], which resolves for
//! every subscriber the most specific handler it exposes:
//!
//! ```text
//! producers ─► ClearableQueue ─► worker ─► ResultBuffer ─► ready hook
//!                                  │                          │
//!                          throttle (Interrupt)       Router::drain ─► subscribers
//! ```
//!
//! ```no_run
//! use edsmq_dispatch::{api, Dispatcher, Router, Subscriber, SubscriberRegistry, HandlerOutcome};
//! use std::sync::Arc;
//! use tokio::sync::Notify;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let client = edsmq_http::HttpClient::new("https://www.edsm.net")?;
//! let dispatcher = Dispatcher::new(client);
//! let ready = Arc::new(Notify::new());
//! let notify = Arc::clone(&ready);
//! dispatcher.set_ready_hook(move || notify.notify_one());
//! dispatcher.start()?;
//!
//! let registry = SubscriberRegistry::default();
//! registry.register(Subscriber::new("printer").on_endpoint(
//!     api::SYSTEM_V1,
//!     api::SYSTEM_V1_BODIES,
//!     |_req, reply| {
//!         println!("{}", reply["name"]);
//!         Ok(HandlerOutcome::Handled)
//!     },
//! ));
//!
//! dispatcher.request_get(api::SYSTEM_V1, api::SYSTEM_V1_BODIES, [("systemName", "Sol")]);
//! ready.notified().await;
//! Router::new().drain(&dispatcher, &registry)?;
//! dispatcher.stop().await;
//! # Ok(()) }
//! ```

pub mod api;
pub mod buffer;
pub mod dispatcher;
pub mod queue;
pub mod request;
pub mod router;
pub mod signal;
pub mod subscriber;
pub mod transport;

pub use buffer::ResultBuffer;
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, DispatcherState, ReadyHook};
pub use queue::ClearableQueue;
pub use request::{Method, Reply, Request, ResultEntry};
pub use router::{Delivery, HandlerErrorPolicy, HandlerUsage, Router, RouterError};
pub use signal::Interrupt;
pub use subscriber::{
    BoxError, HandlerOutcome, HandlerResult, Subscribe, Subscriber, SubscriberRegistry,
    SubscriberSource,
};
pub use transport::Transport;
