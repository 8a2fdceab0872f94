//! Background request dispatcher.
//!
//! One worker task per [`Dispatcher`] pulls jobs off a [`ClearableQueue`],
//! performs each request with bounded retries, buffers non-empty replies and
//! signals the host through the ready hook. Between requests the worker
//! sleeps for the configured throttle, which [`Dispatcher::stop`] can cut
//! short. The request in flight when `stop` is called is allowed to finish.

use crate::buffer::ResultBuffer;
use crate::queue::ClearableQueue;
use crate::request::{Reply, Request, ResultEntry};
use crate::signal::Interrupt;
use crate::transport::Transport;
use edsmq_http::HttpClient;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Called by the worker after each new entry lands in the result buffer.
///
/// Runs on the worker task, so it should only schedule work (notify a
/// waiter, send on a channel) and return. One call per entry; the host is
/// expected to drain everything available on each call.
pub type ReadyHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Minimum pause between the end of one request and the start of the next.
    pub throttle: Duration,
    /// Attempts per request, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Pause between failed attempts of the same request.
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(5),
            max_attempts: 3,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Worker lifecycle.
///
/// `Idle → Running → Draining → Stopped`. Starting a `Stopped` dispatcher
/// resets it to `Idle` before the new worker moves it to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    /// `stop` was called; the worker finishes its current request and exits.
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher cannot start without a result-ready hook")]
    NoReadyHook,
    #[error("dispatcher must be started inside a tokio runtime: {0}")]
    NoRuntime(String),
    #[error("dispatcher is still draining; wait for stop() before starting again")]
    Draining,
}

enum Job {
    Fetch(Request),
    Shutdown,
}

struct Shared<T> {
    transport: T,
    config: DispatcherConfig,
    queue: ClearableQueue<Job>,
    results: ResultBuffer,
    interrupt: Interrupt,
    state: watch::Sender<DispatcherState>,
}

impl<T> Shared<T> {
    fn set_state(&self, state: DispatcherState) {
        self.state.send_replace(state);
    }

    fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }
}

/// Publishes `Stopped` when the worker future ends, including by panic.
struct WorkerExit<'a, T>(&'a Shared<T>);

impl<T> Drop for WorkerExit<'_, T> {
    fn drop(&mut self) {
        self.0.set_state(DispatcherState::Stopped);
    }
}

pub struct Dispatcher<T: Transport = HttpClient> {
    shared: Arc<Shared<T>>,
    ready: Mutex<Option<ReadyHook>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DispatcherConfig::default())
    }

    pub fn with_config(transport: T, config: DispatcherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                queue: ClearableQueue::new(),
                results: ResultBuffer::new(),
                interrupt: Interrupt::new(),
                state: watch::channel(DispatcherState::Idle).0,
            }),
            ready: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Installs the hook. Takes effect at the next [`Dispatcher::start`].
    pub fn set_ready_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.ready) = Some(Arc::new(hook));
    }

    pub fn with_ready_hook<F>(self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set_ready_hook(hook);
        self
    }

    /// Spawns the worker on the current tokio runtime.
    ///
    /// Calling `start` while the worker is running does nothing. A stopped
    /// dispatcher can be started again, but not while a previous `stop` is
    /// still draining.
    pub fn start(&self) -> Result<(), DispatchError> {
        let Some(hook) = lock(&self.ready).clone() else {
            error!("edsmq.dispatcher.start_rejected: no ready hook configured");
            return Err(DispatchError::NoReadyHook);
        };

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            match self.shared.state() {
                DispatcherState::Running => {
                    debug!("edsmq.dispatcher.already_running");
                    return Ok(());
                }
                DispatcherState::Draining => {
                    warn!("edsmq.dispatcher.start_rejected: previous worker still draining");
                    return Err(DispatchError::Draining);
                }
                DispatcherState::Idle | DispatcherState::Stopped => {}
            }
        }

        let runtime = Handle::try_current().map_err(|e| DispatchError::NoRuntime(e.to_string()))?;

        // the old worker has left its loop; its handle only carries the exit status
        if worker.take().is_some() {
            debug!("edsmq.dispatcher.previous_worker_released");
        }
        if self.shared.state() == DispatcherState::Stopped {
            self.shared.set_state(DispatcherState::Idle);
            debug!("edsmq.dispatcher.reset");
        }

        self.shared.interrupt.reset();
        self.shared.set_state(DispatcherState::Running);
        *worker = Some(runtime.spawn(run_worker(Arc::clone(&self.shared), hook)));

        info!(
            throttle_ms = self.shared.config.throttle.as_millis() as u64,
            max_attempts = self.shared.config.max_attempts,
            "edsmq.dispatcher.started"
        );
        Ok(())
    }

    /// Discards pending requests and waits for the worker to exit.
    ///
    /// Returns promptly even mid-throttle. Results already buffered stay
    /// available through [`Dispatcher::get_response`].
    ///
    /// Every concurrent caller waits for the same worker exit. Dropping the
    /// future early leaves the dispatcher `Draining`; a later `stop` picks up
    /// the wait where it was left.
    pub async fn stop(&self) {
        {
            let worker = lock(&self.worker);
            if worker.is_none() {
                debug!("edsmq.dispatcher.stop_ignored: not running");
                return;
            }
            if self.shared.state() == DispatcherState::Running {
                self.shared.set_state(DispatcherState::Draining);
                let discarded = self.shared.queue.clear();
                self.shared.queue.put(Job::Shutdown);
                self.shared.interrupt.raise();
                debug!(discarded, "edsmq.dispatcher.draining");
            }
        }

        let mut state = self.shared.state.subscribe();
        if state
            .wait_for(|s| *s == DispatcherState::Stopped)
            .await
            .is_err()
        {
            return;
        }

        // a concurrent start may already own the slot
        let handle = {
            let mut worker = lock(&self.worker);
            if self.shared.state() == DispatcherState::Stopped {
                worker.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "edsmq.dispatcher.worker_failed");
            }
            info!("edsmq.dispatcher.stopped");
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.shared.state()
    }

    pub fn enqueue(&self, request: Request) {
        debug!(
            api = request.api(),
            endpoint = request.endpoint(),
            method = %request.method(),
            "edsmq.request.enqueued"
        );
        self.shared.queue.put(Job::Fetch(request));
    }

    pub fn request_get<I, K, V>(&self, api: &str, endpoint: &str, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.enqueue(Request::get(api, endpoint).with_params(params));
    }

    pub fn request_post<I, K, V>(&self, api: &str, endpoint: &str, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.enqueue(Request::post(api, endpoint).with_params(params));
    }

    /// Oldest buffered result, or `None` when nothing is waiting.
    pub fn get_response(&self) -> Option<ResultEntry> {
        self.shared.results.pop_first()
    }

    /// Requests queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Results buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.shared.results.len()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        let alive = lock(&self.worker).is_some();
        if alive && self.shared.state() == DispatcherState::Running {
            self.shared.queue.clear();
            self.shared.queue.put(Job::Shutdown);
            self.shared.interrupt.raise();
        }
    }
}

async fn run_worker<T: Transport>(shared: Arc<Shared<T>>, ready: ReadyHook) {
    let _exit = WorkerExit(&shared);
    debug!("edsmq.dispatcher.worker_started");

    loop {
        let request = match shared.queue.get().await {
            Job::Fetch(request) => request,
            Job::Shutdown => break,
        };

        if let Some(reply) = fetch(&shared, &request).await {
            shared.results.push(ResultEntry { request, reply });
            ready();
        }

        let throttle = shared.config.throttle;
        if !throttle.is_zero() && shared.interrupt.wait(throttle).await {
            debug!("edsmq.dispatcher.throttle_interrupted");
        }
    }

    debug!("edsmq.dispatcher.worker_exited");
}

/// Runs up to `max_attempts` attempts. `None` means nothing is delivered.
async fn fetch<T: Transport>(shared: &Shared<T>, request: &Request) -> Option<Reply> {
    let max_attempts = shared.config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match shared.transport.execute(request).await {
            Ok(reply) if is_empty_reply(&reply) => {
                warn!(
                    api = request.api(),
                    endpoint = request.endpoint(),
                    attempt,
                    "edsmq.request.empty_reply"
                );
                return None;
            }
            Ok(reply) => {
                debug!(
                    api = request.api(),
                    endpoint = request.endpoint(),
                    attempt,
                    "edsmq.request.completed"
                );
                return Some(reply);
            }
            Err(err) => {
                error!(
                    api = request.api(),
                    endpoint = request.endpoint(),
                    method = %request.method(),
                    attempt,
                    max_attempts,
                    error = %err,
                    "edsmq.request.attempt_failed"
                );
                let delay = shared.config.retry_delay;
                if attempt < max_attempts && !delay.is_zero() {
                    shared.interrupt.wait(delay).await;
                }
            }
        }
    }

    error!(
        api = request.api(),
        endpoint = request.endpoint(),
        attempts = max_attempts,
        "edsmq.request.abandoned"
    );
    None
}

fn is_empty_reply(reply: &Reply) -> bool {
    match reply {
        Reply::Null => true,
        Reply::Object(map) => map.is_empty(),
        Reply::Array(items) => items.is_empty(),
        Reply::String(s) => s.is_empty(),
        Reply::Bool(_) | Reply::Number(_) => false,
    }
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
