use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use edsmq_config::EdsmqConfig;
use edsmq_dispatch::{
    api, Dispatcher, DispatcherConfig, HandlerOutcome, Router, Subscriber, SubscriberRegistry,
    SubscriberSource,
};
use edsmq_http::HttpClient;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::progress::BodyProgress;

/// Owns the dispatcher and subscriber set, and pumps ready signals into
/// router drains until asked to stop.
pub struct Host {
    dispatcher: Dispatcher,
    registry: SubscriberRegistry,
    router: Router,
    ready: Arc<Notify>,
    progress: BodyProgress,
}

impl Host {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let ready = Arc::new(Notify::new());
        let notify = Arc::clone(&ready);
        dispatcher.set_ready_hook(move || notify.notify_one());

        let progress = BodyProgress::new();
        let registry = SubscriberRegistry::new();
        registry.register(progress.clone());
        registry.register(server_status());
        registry.register(reply_log());

        Self {
            dispatcher,
            registry,
            router: Router::new(),
            ready,
            progress,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn progress(&self) -> &BodyProgress {
        &self.progress
    }

    pub fn request_bodies(&self, system: &str) {
        self.log_usage(api::SYSTEM_V1, api::SYSTEM_V1_BODIES);
        self.dispatcher
            .request_get(api::SYSTEM_V1, api::SYSTEM_V1_BODIES, [("systemName", system)]);
    }

    pub fn request_server_status(&self) {
        self.log_usage(api::STATUS_V1, api::STATUS_V1_ELITE_SERVER);
        self.dispatcher.request_get(
            api::STATUS_V1,
            api::STATUS_V1_ELITE_SERVER,
            Vec::<(String, String)>::new(),
        );
    }

    fn log_usage(&self, api: &str, endpoint: &str) {
        for usage in self
            .router
            .usage(api, endpoint, &self.registry.subscribers())
        {
            debug!(
                api,
                endpoint,
                subscriber = %usage.subscriber,
                handlers = ?usage.handlers,
                "edsmq.host.handler_usage"
            );
        }
    }

    /// Drains everything buffered right now.
    pub fn pump(&self) -> Result<usize> {
        let drained = self
            .router
            .drain(&self.dispatcher, &self.registry)
            .context("routing results to subscribers")?;
        Ok(drained)
    }

    /// Runs until Ctrl-C, or until nothing is queued and no result has
    /// arrived for `idle_exit`.
    pub async fn run(&self, idle_exit: Option<Duration>) -> Result<()> {
        self.dispatcher.start().context("starting dispatcher")?;

        loop {
            let idle = async {
                match idle_exit {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.ready.notified() => {
                    self.pump()?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("edsmq.host.interrupted");
                    break;
                }
                _ = idle => {
                    if self.dispatcher.pending() == 0 {
                        info!("edsmq.host.idle_exit");
                        break;
                    }
                }
            }
        }

        self.dispatcher.stop().await;
        let leftover = self.pump()?;
        if leftover > 0 {
            debug!(leftover, "edsmq.host.final_drain");
        }
        let snapshot = self.progress.snapshot();
        info!(
            system = snapshot.system.as_deref().unwrap_or("-"),
            progress = %snapshot,
            complete = snapshot.is_complete(),
            "edsmq.host.finished"
        );
        Ok(())
    }
}

/// Builds the dispatcher described by `config`.
pub fn build_from_config(config: &EdsmqConfig) -> Result<Host> {
    let settings = &config.dispatcher;
    let mut client = HttpClient::new(&settings.base_url)
        .with_context(|| format!("invalid base_url {}", settings.base_url))?
        .with_timeout(settings.timeout());
    if let Some(agent) = settings.user_agent.as_deref() {
        client = client
            .with_user_agent(agent)
            .with_context(|| format!("invalid user_agent {agent:?}"))?;
    }

    let dispatcher = Dispatcher::with_config(
        client,
        DispatcherConfig {
            throttle: settings.throttle(),
            max_attempts: settings.max_attempts,
            retry_delay: settings.retry_delay(),
        },
    );
    Ok(Host::new(dispatcher))
}

fn server_status() -> Subscriber {
    Subscriber::new("server-status").on_endpoint(
        api::STATUS_V1,
        api::STATUS_V1_ELITE_SERVER,
        |_, reply| {
            let message = reply.get("message").and_then(|m| m.as_str()).unwrap_or("?");
            match reply.get("status").and_then(|s| s.as_i64()) {
                Some(2) => info!(message, "edsmq.status.online"),
                status => warn!(?status, message, "edsmq.status.degraded"),
            }
            Ok(HandlerOutcome::Handled)
        },
    )
}

fn reply_log() -> Subscriber {
    Subscriber::new("reply-log").on_any(|request, reply| {
        debug!(
            api = request.api(),
            endpoint = request.endpoint(),
            reply = %reply,
            "edsmq.host.reply"
        );
        Ok(HandlerOutcome::Continue)
    })
}
