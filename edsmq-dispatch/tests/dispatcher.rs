mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_test_tracing, ReadyCounter, ScriptedTransport};
use edsmq_dispatch::{
    api, DispatchError, Dispatcher, DispatcherConfig, DispatcherState, Method, Request,
};
use serde_json::json;
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(5);

fn unthrottled() -> DispatcherConfig {
    DispatcherConfig {
        throttle: Duration::ZERO,
        ..DispatcherConfig::default()
    }
}

fn started(
    transport: ScriptedTransport,
    config: DispatcherConfig,
) -> (Dispatcher<ScriptedTransport>, ReadyCounter) {
    init_test_tracing();
    let ready = ReadyCounter::default();
    let dispatcher = Dispatcher::with_config(transport, config).with_ready_hook(ready.hook());
    dispatcher.start().expect("start dispatcher");
    (dispatcher, ready)
}

/// Waits until the worker has taken requests off the queue down to `left`.
async fn picked_up(dispatcher: &Dispatcher<ScriptedTransport>, left: usize) {
    tokio::time::timeout(WAIT, async {
        while dispatcher.pending() != left {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker picked up the request");
}

fn system(name: &str) -> Request {
    Request::get(api::SYSTEM_V1, api::SYSTEM_V1_BODIES).with_param("systemName", name)
}

#[tokio::test]
async fn requests_complete_in_enqueue_order() {
    let (dispatcher, ready) = started(ScriptedTransport::new(), unthrottled());
    for name in ["Sol", "Achenar", "Shinrarta Dezhra"] {
        dispatcher.enqueue(system(name));
    }

    ready.wait_for(3, WAIT).await;

    let order: Vec<String> = std::iter::from_fn(|| dispatcher.get_response())
        .map(|e| e.request.param("systemName").unwrap_or_default().to_string())
        .collect();
    assert_eq!(order, ["Sol", "Achenar", "Shinrarta Dezhra"]);
    assert!(dispatcher.get_response().is_none());
    dispatcher.stop().await;
}

#[tokio::test]
async fn failing_request_is_tried_three_times_then_dropped() {
    let transport = ScriptedTransport::new()
        .fail("connection reset")
        .fail("connection reset")
        .fail("connection reset");
    let (dispatcher, ready) = started(transport, unthrottled());

    dispatcher.enqueue(system("Sol"));
    dispatcher.enqueue(system("Achenar"));
    ready.wait_for(1, WAIT).await;

    let calls = dispatcher.transport().calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[..3].iter().all(|c| c.request == system("Sol")));

    let entry = dispatcher.get_response().expect("second request delivered");
    assert_eq!(entry.request, system("Achenar"));
    assert!(dispatcher.get_response().is_none());
    assert_eq!(ready.count(), 1);
    dispatcher.stop().await;
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let transport = ScriptedTransport::new()
        .fail("timed out")
        .reply(json!({ "name": "Sol", "id": 27 }));
    let (dispatcher, ready) = started(transport, unthrottled());

    dispatcher.enqueue(system("Sol"));
    ready.wait_for(1, WAIT).await;

    assert_eq!(dispatcher.transport().call_count(), 2);
    let entry = dispatcher.get_response().unwrap();
    assert_eq!(entry.reply["id"], 27);
    dispatcher.stop().await;
}

#[tokio::test]
async fn max_attempts_is_configurable() {
    let transport = ScriptedTransport::new().fail("down");
    let config = DispatcherConfig {
        max_attempts: 1,
        ..unthrottled()
    };
    let (dispatcher, ready) = started(transport, config);

    dispatcher.enqueue(system("Sol"));
    dispatcher.enqueue(system("Achenar"));
    ready.wait_for(1, WAIT).await;

    assert_eq!(dispatcher.transport().call_count(), 2);
    assert_eq!(dispatcher.get_response().unwrap().request, system("Achenar"));
    dispatcher.stop().await;
}

#[tokio::test]
async fn empty_replies_are_not_delivered() {
    let transport = ScriptedTransport::new().reply(json!({})).reply(json!([]));
    let (dispatcher, ready) = started(transport, unthrottled());

    dispatcher.enqueue(system("Nowhere"));
    dispatcher.enqueue(system("Nowhere Else"));
    dispatcher.enqueue(system("Sol"));
    ready.wait_for(1, WAIT).await;

    assert_eq!(dispatcher.transport().call_count(), 3);
    assert_eq!(dispatcher.get_response().unwrap().request, system("Sol"));
    assert!(dispatcher.get_response().is_none());
    dispatcher.stop().await;
}

#[tokio::test]
async fn throttle_spaces_consecutive_requests() {
    let throttle = Duration::from_millis(150);
    let config = DispatcherConfig {
        throttle,
        ..DispatcherConfig::default()
    };
    let (dispatcher, ready) = started(ScriptedTransport::new(), config);

    for name in ["A", "B", "C"] {
        dispatcher.enqueue(system(name));
    }
    ready.wait_for(3, WAIT).await;

    let calls = dispatcher.transport().calls();
    for pair in calls.windows(2) {
        let gap = pair[1].started.duration_since(pair[0].finished);
        assert!(gap >= throttle, "gap {gap:?} shorter than throttle");
    }
    dispatcher.stop().await;
}

#[tokio::test]
async fn stop_cuts_the_throttle_wait_short() {
    let config = DispatcherConfig {
        throttle: Duration::from_secs(60),
        ..DispatcherConfig::default()
    };
    let (dispatcher, ready) = started(ScriptedTransport::new(), config);

    dispatcher.enqueue(system("Sol"));
    ready.wait_for(1, WAIT).await;

    tokio::time::timeout(Duration::from_secs(2), dispatcher.stop())
        .await
        .expect("stop returns without waiting out the throttle");
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert!(dispatcher.get_response().is_some(), "buffered results survive stop");
}

#[tokio::test]
async fn stop_discards_pending_requests_but_finishes_the_current_one() {
    let gate = Arc::new(Notify::new());
    let transport = ScriptedTransport::new().with_gate(Arc::clone(&gate));
    let (dispatcher, ready) = started(transport, unthrottled());

    for name in ["Sol", "Achenar", "Lave"] {
        dispatcher.enqueue(system(name));
    }
    picked_up(&dispatcher, 2).await;

    tokio::join!(dispatcher.stop(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();
    });

    assert_eq!(dispatcher.transport().call_count(), 1);
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(dispatcher.get_response().unwrap().request, system("Sol"));
    assert!(dispatcher.get_response().is_none());

    // only work enqueued after the clear survives into the next run
    dispatcher.enqueue(system("Vega"));
    dispatcher.start().unwrap();
    gate.notify_one();
    ready.wait_for(2, WAIT).await;

    let served: Vec<_> = dispatcher
        .transport()
        .calls()
        .into_iter()
        .map(|c| c.request)
        .collect();
    assert_eq!(served, [system("Sol"), system("Vega")]);
    assert_eq!(dispatcher.get_response().unwrap().request, system("Vega"));
    dispatcher.stop().await;
}

#[tokio::test]
async fn abandoned_stop_is_finished_by_the_next_one() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(300));
    let (dispatcher, ready) = started(transport, unthrottled());
    dispatcher.enqueue(system("Sol"));
    picked_up(&dispatcher, 0).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(10), dispatcher.stop()).await;
    assert!(abandoned.is_err(), "stop waits for the request in flight");
    assert_eq!(dispatcher.state(), DispatcherState::Draining);
    assert!(matches!(dispatcher.start(), Err(DispatchError::Draining)));

    dispatcher.stop().await;
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(dispatcher.transport().call_count(), 1);

    for name in ["Achenar", "Lave"] {
        dispatcher.enqueue(system(name));
    }
    dispatcher.start().unwrap();
    ready.wait_for(3, WAIT).await;
    dispatcher.stop().await;
    assert_eq!(dispatcher.transport().call_count(), 3);

    // nothing is left to pick this up
    dispatcher.enqueue(system("Vega"));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(dispatcher.transport().call_count(), 3);
    assert_eq!(dispatcher.pending(), 1);
}

#[tokio::test]
async fn concurrent_stops_all_wait_for_the_worker() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(200));
    let (dispatcher, _ready) = started(transport, unthrottled());
    dispatcher.enqueue(system("Sol"));
    picked_up(&dispatcher, 0).await;

    let (_, second) = tokio::join!(dispatcher.stop(), async {
        tokio::task::yield_now().await;
        dispatcher.stop().await;
        (dispatcher.transport().call_count(), dispatcher.state())
    });

    assert_eq!(second, (1, DispatcherState::Stopped));
    assert_eq!(dispatcher.get_response().unwrap().request, system("Sol"));
}

#[tokio::test]
async fn dispatcher_can_be_restarted() {
    let (dispatcher, ready) = started(ScriptedTransport::new(), unthrottled());
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    dispatcher.stop().await;
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);

    dispatcher.enqueue(system("Sol"));
    dispatcher.start().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    ready.wait_for(1, WAIT).await;
    assert_eq!(dispatcher.get_response().unwrap().request, system("Sol"));
    dispatcher.stop().await;
}

#[tokio::test]
async fn second_start_keeps_a_single_worker() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(30));
    let (dispatcher, ready) = started(transport, unthrottled());
    dispatcher.start().unwrap();
    dispatcher.start().unwrap();

    for name in ["A", "B", "C"] {
        dispatcher.enqueue(system(name));
    }
    ready.wait_for(3, WAIT).await;

    let calls = dispatcher.transport().calls();
    for pair in calls.windows(2) {
        assert!(pair[1].started >= pair[0].finished, "requests overlapped");
    }
    dispatcher.stop().await;
}

#[tokio::test]
async fn concurrent_producers_keep_their_own_order() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 25;

    let (dispatcher, ready) = started(ScriptedTransport::new(), unthrottled());
    let dispatcher = Arc::new(dispatcher);

    let threads: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let d = Arc::clone(&dispatcher);
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    d.request_get(
                        api::SYSTEM_V1,
                        api::SYSTEM_V1_BODIES,
                        [("producer", p.to_string()), ("seq", i.to_string())],
                    );
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    ready.wait_for(PRODUCERS * PER_PRODUCER, WAIT).await;

    let mut last_seen = vec![None::<usize>; PRODUCERS];
    let mut delivered = 0;
    while let Some(entry) = dispatcher.get_response() {
        let p: usize = entry.request.param("producer").unwrap().parse().unwrap();
        let seq: usize = entry.request.param("seq").unwrap().parse().unwrap();
        assert!(last_seen[p].is_none_or(|prev| prev < seq));
        last_seen[p] = Some(seq);
        delivered += 1;
    }
    assert_eq!(delivered, PRODUCERS * PER_PRODUCER);
    assert_eq!(ready.count(), delivered);
    dispatcher.stop().await;
}

#[tokio::test]
async fn post_requests_keep_their_method() {
    let (dispatcher, ready) = started(ScriptedTransport::new(), unthrottled());
    dispatcher.request_post(api::LOGS_V1, "set-comment", [("systemName", "Sol"), ("comment", "home")]);
    ready.wait_for(1, WAIT).await;

    let entry = dispatcher.get_response().unwrap();
    assert_eq!(entry.request.method(), Method::Post);
    assert_eq!(entry.request.param("comment"), Some("home"));
    assert_eq!(entry.reply["path"], "api-logs-v1/set-comment");
    dispatcher.stop().await;
}
