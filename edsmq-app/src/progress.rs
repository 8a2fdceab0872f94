//! Scan progress of the current system, fed by `api-system-v1/bodies`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use edsmq_dispatch::router::endpoint_handler;
use edsmq_dispatch::{api, HandlerOutcome, HandlerResult, Reply, Request, Subscribe};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ProgressState {
    system: Option<String>,
    body_count: u64,
    known: Vec<String>,
}

/// Point-in-time view of [`BodyProgress`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub system: Option<String>,
    pub known: usize,
    pub total: u64,
}

impl ProgressSnapshot {
    /// `None` while the body count is unknown.
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.known as f64 * 100.0 / self.total as f64)
    }

    pub fn is_complete(&self) -> bool {
        self.percent().is_some_and(|p| p >= 100.0)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent() {
            Some(pct) => write!(f, "{}/{} ({pct:.0}%)", self.known, self.total),
            None => f.write_str("[?/?]"),
        }
    }
}

/// Tracks how many bodies of the current system EDSM already knows.
///
/// Cheap to clone; clones share state, so the host can keep one handle for
/// reading while another sits in the subscriber registry.
#[derive(Debug, Clone)]
pub struct BodyProgress {
    handler: String,
    state: Arc<Mutex<ProgressState>>,
}

impl Default for BodyProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyProgress {
    pub const NAME: &'static str = "body-progress";

    pub fn new() -> Self {
        Self {
            handler: endpoint_handler(api::SYSTEM_V1, api::SYSTEM_V1_BODIES),
            state: Arc::default(),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ProgressSnapshot {
            system: state.system.clone(),
            known: state.known.len(),
            total: state.body_count,
        }
    }

    fn apply(&self, request: &Request, reply: &Reply) -> HandlerResult {
        let system = reply
            .get("name")
            .and_then(Reply::as_str)
            .ok_or("bodies reply carries no system name")?;

        if let Some(asked) = request.param("systemName") {
            if !asked.eq_ignore_ascii_case(system) {
                warn!(asked, replied = system, "edsmq.progress.system_mismatch");
                return Ok(HandlerOutcome::Handled);
            }
        }

        let mut changed = false;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.system.as_deref() != Some(system) {
                *state = ProgressState {
                    system: Some(system.to_string()),
                    ..ProgressState::default()
                };
                changed = true;
            }

            let count = reply.get("bodyCount").and_then(Reply::as_u64);
            if let Some(count) = count.filter(|c| *c != state.body_count) {
                state.body_count = count;
                changed = true;
            }

            let names = reply
                .get("bodies")
                .and_then(Reply::as_array)
                .into_iter()
                .flatten()
                .filter_map(|body| body.get("name").and_then(Reply::as_str));
            for name in names {
                if !state.known.iter().any(|k| k == name) {
                    state.known.push(name.to_string());
                    changed = true;
                }
            }
            debug!(system, known = ?state.known, "edsmq.progress.bodies");
        }

        if changed {
            let snapshot = self.snapshot();
            info!(system, progress = %snapshot, "edsmq.progress.updated");
        }
        Ok(HandlerOutcome::Handled)
    }
}

impl Subscribe for BodyProgress {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn has_handler(&self, handler: &str) -> bool {
        handler == self.handler
    }

    fn invoke(&self, handler: &str, request: &Request, reply: &Reply) -> Option<HandlerResult> {
        self.has_handler(handler).then(|| self.apply(request, reply))
    }

    fn handler_names(&self) -> Vec<String> {
        vec![self.handler.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bodies(system: &str) -> Request {
        Request::get(api::SYSTEM_V1, api::SYSTEM_V1_BODIES).with_param("systemName", system)
    }

    fn feed(progress: &BodyProgress, request: &Request, reply: Reply) -> HandlerOutcome {
        progress
            .invoke("response_api_system_v1_bodies", request, &reply)
            .expect("handler exists")
            .expect("handler succeeds")
    }

    #[test]
    fn unknown_count_shows_placeholder() {
        let snap = BodyProgress::new().snapshot();
        assert_eq!(snap.percent(), None);
        assert_eq!(snap.to_string(), "[?/?]");
    }

    #[test]
    fn counts_distinct_bodies() {
        let progress = BodyProgress::new();
        let reply = json!({
            "name": "Sol",
            "bodyCount": 4,
            "bodies": [{ "name": "Sol" }, { "name": "Earth" }, { "name": "Earth" }],
        });
        assert_eq!(feed(&progress, &bodies("Sol"), reply), HandlerOutcome::Handled);

        let snap = progress.snapshot();
        assert_eq!(snap.system.as_deref(), Some("Sol"));
        assert_eq!(snap.known, 2);
        assert_eq!(snap.percent(), Some(50.0));
        assert_eq!(snap.to_string(), "2/4 (50%)");
    }

    #[test]
    fn new_system_resets_progress() {
        let progress = BodyProgress::new();
        feed(
            &progress,
            &bodies("Sol"),
            json!({ "name": "Sol", "bodyCount": 1, "bodies": [{ "name": "Sol" }] }),
        );
        assert!(progress.snapshot().is_complete());

        feed(
            &progress,
            &bodies("Achenar"),
            json!({ "name": "Achenar", "bodies": [] }),
        );
        let snap = progress.snapshot();
        assert_eq!(snap.system.as_deref(), Some("Achenar"));
        assert_eq!(snap.known, 0);
        assert_eq!(snap.total, 0);
    }

    #[test]
    fn late_reply_for_another_system_is_ignored() {
        let progress = BodyProgress::new();
        feed(
            &progress,
            &bodies("Sol"),
            json!({ "name": "Achenar", "bodyCount": 9, "bodies": [] }),
        );
        assert_eq!(progress.snapshot().system, None);
    }

    #[test]
    fn reply_without_name_is_an_error() {
        let progress = BodyProgress::new();
        let result = progress
            .invoke("response_api_system_v1_bodies", &bodies("Sol"), &json!({ "id": 1 }))
            .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn only_answers_the_bodies_handler() {
        let progress = BodyProgress::new();
        assert!(progress.has_handler("response_api_system_v1_bodies"));
        assert!(!progress.has_handler("response_api_system_v1"));
        assert!(!progress.has_handler("response"));
    }
}
