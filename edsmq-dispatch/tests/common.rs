#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use edsmq_common::observability::{LogConfig, LogFormat};
use edsmq_dispatch::{Reply, Request, Transport};
use edsmq_http::HttpError;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;

static INIT_PATH: OnceLock<std::path::PathBuf> = OnceLock::new();

pub fn init_test_tracing() {
    let _ = INIT_PATH.get_or_init(|| {
        let config = LogConfig {
            app_name: "edsmq-tests".to_string(),
            log_dir: Some(std::env::temp_dir().join("edsmq-tests")),
            emit_stderr: true,
            format: if std::env::var("EDSMQ_LOG_FORMAT")
                .map(|raw| raw.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(false)
            {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
            default_filter: "debug".to_string(),
        };

        edsmq_common::observability::init_logging(config).unwrap_or_default()
    });
}

/// One call seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Call {
    pub request: Request,
    pub started: Instant,
    pub finished: Instant,
}

/// In-memory transport that replays scripted outcomes in order and answers
/// `{"ok": true, "path": ...}` once the script runs out.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Reply, HttpError>>>,
    calls: Mutex<Vec<Call>>,
    latency: Duration,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call waits for one permit on `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.script.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(HttpError::Network(message.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &Request) -> Result<Reply, HttpError> {
        let started = Instant::now();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "ok": true, "path": request.path() })));
        self.calls.lock().unwrap().push(Call {
            request: request.clone(),
            started,
            finished: Instant::now(),
        });
        outcome
    }
}

/// Counts ready-hook calls and lets a test wait for the n-th one.
#[derive(Clone, Default)]
pub struct ReadyCounter {
    count: Arc<Mutex<usize>>,
    notify: Arc<Notify>,
}

impl ReadyCounter {
    pub fn hook(&self) -> impl Fn() + Send + Sync + 'static {
        let count = Arc::clone(&self.count);
        let notify = Arc::clone(&self.notify);
        move || {
            *count.lock().unwrap() += 1;
            notify.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Waits until the hook fired at least `n` times, or panics after `limit`.
    pub async fn wait_for(&self, n: usize, limit: Duration) {
        tokio::time::timeout(limit, async {
            while self.count() < n {
                tokio::time::timeout(Duration::from_millis(20), self.notify.notified())
                    .await
                    .ok();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("ready hook fired {} times, wanted {n}", self.count()));
    }
}
