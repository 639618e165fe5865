//! Refresh coordination tests.

use std::time::Duration;

use session_guard::error::GuardError;
use session_guard::http::{ApiRequest, ApiResponse, Priority, TransportError};
use session_guard::resilience::CircuitState;
use session_guard::session::{BroadcastHub, SessionEvent, Visibility};

mod common;

use common::{harness, harness_on, test_config, wait_until, MockTransport};

fn unauthorized() -> TransportError {
    TransportError::from_status(401)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_auth_failures_share_one_refresh() {
    let config = test_config();
    let h = harness(
        &config,
        MockTransport::expiring_session().with_refresh_delay(Duration::from_millis(200)),
    );

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move { pipeline.send(ApiRequest::get(format!("/api/items/{}", i))).await })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.text(), format!("/api/items/{}", i));
    }

    assert_eq!(h.transport.refresh_calls(), 1);
    assert_eq!(h.transport.replays().len(), 5);
    assert!(!h.coordinator.is_refreshing());
    assert!(h.coordinator.last_refresh().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_queue_drains_by_priority_after_refresh() {
    let config = test_config();
    let h = harness(
        &config,
        MockTransport::expiring_session().with_refresh_delay(Duration::from_millis(200)),
    );

    let coordinator = h.coordinator.clone();
    let initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let mut queued = Vec::new();
    for (path, priority) in [
        ("/api/low", Priority::Low),
        ("/api/high", Priority::High),
        ("/api/normal", Priority::Normal),
    ] {
        let coordinator = h.coordinator.clone();
        let request = ApiRequest::put(path).with_priority(priority);
        let expected = queued.len() + 1;
        queued.push(tokio::spawn(async move {
            coordinator.handle_failure(&request, unauthorized()).await
        }));
        wait_until(|| h.coordinator.queue_len() == expected).await;
    }

    for task in queued {
        assert_eq!(task.await.unwrap().unwrap().status, 200);
    }
    assert_eq!(initiator.await.unwrap().unwrap().text(), "/api/initiator");

    let replayed: Vec<String> = h.transport.replays().into_iter().map(|r| r.path).collect();
    assert_eq!(replayed, ["/api/high", "/api/normal", "/api/low", "/api/initiator"]);
    assert!(h.transport.replays().iter().all(|r| r.is_retry));
    assert_eq!(h.transport.refresh_calls(), 1);
    assert_eq!(h.coordinator.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_unauthorized_terminates_session_once() {
    let mut config = test_config();
    config.refresh.login_path = "/login".to_string();
    let transport = MockTransport::expiring_session().with_refresh_delay(Duration::from_millis(200));
    transport.set_refresh_default(Err(unauthorized()));
    let h = harness(&config, transport);
    let mut events = h.coordinator.subscribe_events();

    let coordinator = h.coordinator.clone();
    let initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let mut queued = Vec::new();
    for i in 0..3 {
        let coordinator = h.coordinator.clone();
        queued.push(tokio::spawn(async move {
            coordinator
                .handle_failure(&ApiRequest::get(format!("/api/queued/{}", i)), unauthorized())
                .await
        }));
        wait_until(|| h.coordinator.queue_len() == i + 1).await;
    }

    for task in queued {
        assert!(matches!(task.await.unwrap(), Err(GuardError::SessionTerminated)));
    }
    assert!(matches!(initiator.await.unwrap(), Err(GuardError::SessionTerminated)));

    assert_eq!(h.transport.refresh_calls(), 1, "401 from refresh is not retried");
    assert!(h.transport.replays().is_empty());
    assert_eq!(h.host.cleared(), 1);

    let mut terminations = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SessionTerminated { redirect } = event {
            terminations.push(redirect);
        }
    }
    let expected = "/login?session_expired=true&redirect=%2Fservers%2F7%3Ftab%3Dchat";
    assert_eq!(terminations, [expected]);

    assert!(h.host.navigations.lock().is_empty(), "navigation waits for the redirect delay");
    tokio::time::sleep(config.refresh.redirect_delay()).await;
    wait_until(|| !h.host.navigations.lock().is_empty()).await;
    assert_eq!(*h.host.navigations.lock(), [expected]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_server_errors_are_retried_then_reported() {
    let mut config = test_config();
    config.refresh.max_refresh_retries = 2;
    let transport = MockTransport::expiring_session();
    transport.set_refresh_default(Err(TransportError::from_status(502)));
    let h = harness(&config, transport);

    let err = h
        .pipeline
        .send(ApiRequest::post("/api/messages"))
        .await
        .unwrap_err();

    assert!(matches!(err, GuardError::RefreshFailed(ref e) if e.status() == Some(502)));
    assert_eq!(h.transport.refresh_calls(), 3);
    assert_eq!(h.host.cleared(), 0);
    assert_eq!(h.coordinator.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_and_probes_after_cooldown() {
    let mut config = test_config();
    config.refresh.failure_threshold = 2;
    config.refresh.max_refresh_retries = 0;
    config.refresh.circuit_cooldown_ms = 30_000;
    let transport = MockTransport::expiring_session();
    transport.set_refresh_default(Err(TransportError::from_status(503)));
    let h = harness(&config, transport);

    for _ in 0..2 {
        assert!(matches!(
            h.coordinator.force_refresh().await,
            Err(GuardError::RefreshFailed(_))
        ));
    }
    assert_eq!(h.coordinator.circuit_state(), CircuitState::Open);

    let err = h.coordinator.force_refresh().await.unwrap_err();
    assert!(matches!(err, GuardError::CircuitOpen { .. }));
    assert!(err.is_transient());
    assert_eq!(h.transport.refresh_calls(), 2, "open circuit never reaches the transport");

    let queued = h
        .coordinator
        .handle_failure(&ApiRequest::get("/api/feed"), unauthorized())
        .await;
    assert!(matches!(queued, Err(GuardError::CircuitOpen { .. })));
    assert_eq!(h.transport.refresh_calls(), 2);

    tokio::time::advance(Duration::from_secs(30)).await;
    h.transport.script_refresh(Ok(ApiResponse::new(200, "ok")));
    h.coordinator.force_refresh().await.unwrap();

    assert_eq!(h.transport.refresh_calls(), 3);
    assert_eq!(h.coordinator.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_silent_refresh_respects_interval() {
    let config = test_config();
    let interval = config.refresh.silent_refresh_interval();
    let h = harness(&config, MockTransport::expiring_session());

    h.coordinator.silent_refresh().await;
    assert_eq!(h.transport.refresh_calls(), 0, "no refresh before the first one");

    h.coordinator.force_refresh().await.unwrap();
    assert_eq!(h.transport.refresh_calls(), 1);

    h.coordinator.silent_refresh().await;
    assert_eq!(h.transport.refresh_calls(), 1);

    tokio::time::advance(interval).await;
    h.coordinator.silent_refresh().await;
    h.coordinator.silent_refresh().await;
    assert_eq!(h.transport.refresh_calls(), 2, "second timer fire is a no-op");
}

#[tokio::test(start_paused = true)]
async fn test_silent_refresh_failure_is_swallowed() {
    let config = test_config();
    let h = harness(&config, MockTransport::expiring_session());
    h.coordinator.force_refresh().await.unwrap();

    h.transport.set_refresh_default(Err(TransportError::Network("connection reset".into())));
    tokio::time::advance(config.refresh.silent_refresh_interval()).await;
    h.coordinator.silent_refresh().await;

    assert!(h.transport.refresh_calls() > 1);
    assert!(!h.coordinator.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_timer_triggers_silent_refresh() {
    let config = test_config();
    let h = harness(&config, MockTransport::expiring_session());
    h.coordinator.force_refresh().await.unwrap();

    let mut events = h.coordinator.subscribe_events();
    h.coordinator.start();

    let event = tokio::time::timeout(config.refresh.silent_refresh_interval() * 2, events.recv())
        .await
        .expect("timer should refresh")
        .unwrap();
    assert!(matches!(event, SessionEvent::RefreshSucceeded));
    assert_eq!(h.transport.refresh_calls(), 2);

    h.coordinator.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_idle_refreshes() {
    let config = test_config();
    let idle = config.refresh.idle_threshold();
    let h = harness(&config, MockTransport::expiring_session());
    h.coordinator.force_refresh().await.unwrap();
    tokio::time::advance(config.refresh.silent_refresh_interval()).await;

    h.coordinator.visibility_changed(Visibility::Hidden).await;
    tokio::time::advance(Duration::from_secs(10)).await;
    h.coordinator.visibility_changed(Visibility::Visible).await;
    assert_eq!(h.transport.refresh_calls(), 1, "short absence does not refresh");

    h.coordinator.visibility_changed(Visibility::Hidden).await;
    tokio::time::advance(idle).await;
    h.coordinator.visibility_changed(Visibility::Visible).await;
    assert_eq!(h.transport.refresh_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_remote_refresh_drains_local_queue() {
    let config = test_config();
    let hub = BroadcastHub::new();
    let local = harness_on(
        &hub,
        &config,
        MockTransport::expiring_session().with_refresh_delay(Duration::from_secs(10)),
    );
    let remote = harness_on(&hub, &config, MockTransport::expiring_session());
    local.coordinator.start();
    let mut events = local.coordinator.subscribe_events();

    let coordinator = local.coordinator.clone();
    let _initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| local.coordinator.is_refreshing()).await;

    let coordinator = local.coordinator.clone();
    let queued = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/queued"), unauthorized())
            .await
    });
    wait_until(|| local.coordinator.queue_len() == 1).await;

    remote.coordinator.force_refresh().await.unwrap();

    let response = queued.await.unwrap().unwrap();
    assert_eq!(response.text(), "/api/queued");
    assert!(matches!(events.recv().await.unwrap(), SessionEvent::RemoteRefresh));
    assert!(local.coordinator.is_refreshing(), "local refresh still pending");
    assert_eq!(local.transport.refresh_calls(), 1);
    assert_eq!(remote.transport.refresh_calls(), 1);

    local.coordinator.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_teardown_rejects_pending_and_cancels_refresh() {
    let config = test_config();
    let h = harness(
        &config,
        MockTransport::expiring_session().with_refresh_delay(Duration::from_secs(10)),
    );

    let coordinator = h.coordinator.clone();
    let initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let coordinator = h.coordinator.clone();
    let queued = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/queued"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.queue_len() == 1).await;

    h.coordinator.teardown();

    assert!(matches!(queued.await.unwrap(), Err(GuardError::Teardown)));
    assert!(matches!(initiator.await.unwrap(), Err(GuardError::Cancelled)));
    assert!(h.transport.replays().is_empty());

    let late = h
        .coordinator
        .handle_failure(&ApiRequest::get("/api/late"), unauthorized())
        .await;
    assert!(matches!(late, Err(GuardError::Teardown)));
    assert!(matches!(h.coordinator.refresh().await, Err(GuardError::Teardown)));
}

#[tokio::test(start_paused = true)]
async fn test_queue_overflow_rejects_caller() {
    let mut config = test_config();
    config.queue.max_size = 1;
    let h = harness(
        &config,
        MockTransport::expiring_session().with_refresh_delay(Duration::from_secs(1)),
    );

    let coordinator = h.coordinator.clone();
    let initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let coordinator = h.coordinator.clone();
    let first = tokio::spawn(async move {
        let request = ApiRequest::get("/api/first").with_priority(Priority::High);
        coordinator.handle_failure(&request, unauthorized()).await
    });
    wait_until(|| h.coordinator.queue_len() == 1).await;

    let overflow = h
        .coordinator
        .handle_failure(
            &ApiRequest::get("/api/second").with_priority(Priority::High),
            unauthorized(),
        )
        .await;
    assert!(matches!(overflow, Err(GuardError::QueueOverflow)));

    assert!(first.await.unwrap().is_ok());
    assert!(initiator.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_out_of_scope_failures_pass_through() {
    let config = test_config();
    let h = harness(&config, MockTransport::expiring_session());
    let c = &h.coordinator;

    for request in [
        ApiRequest::post("/refresh"),
        ApiRequest::get("/auth/me"),
        ApiRequest::post("/auth/login"),
        ApiRequest::get("/public/banner.png"),
    ] {
        let err = c.handle_failure(&request, unauthorized()).await.unwrap_err();
        assert!(matches!(err, GuardError::Transport(ref e) if e.is_auth()), "{}", request.path);
    }

    let forbidden = c
        .handle_failure(&ApiRequest::get("/api/admin"), TransportError::from_status(403))
        .await;
    assert!(matches!(forbidden, Err(GuardError::Transport(ref e)) if e.status() == Some(403)));

    let replay = c
        .handle_failure(&ApiRequest::get("/api/feed").as_retry(), unauthorized())
        .await;
    assert!(matches!(replay, Err(GuardError::Transport(_))));

    assert_eq!(h.transport.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_rejects_waiters() {
    let config = test_config();
    let h = harness(
        &config,
        MockTransport::expiring_session().with_refresh_delay(Duration::from_secs(5)),
    );

    let coordinator = h.coordinator.clone();
    let _initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let coordinator = h.coordinator.clone();
    let queued = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/queued"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.queue_len() == 1).await;

    assert_eq!(h.coordinator.clear_queue(), 1);
    assert!(matches!(queued.await.unwrap(), Err(GuardError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_crashed_refresh_releases_coordinator() {
    let config = test_config();
    let transport = MockTransport::expiring_session().with_refresh_delay(Duration::from_millis(200));
    transport.panic_next_refresh();
    let h = harness(&config, transport);

    let coordinator = h.coordinator.clone();
    let initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let coordinator = h.coordinator.clone();
    let queued = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/queued"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.queue_len() == 1).await;

    assert!(matches!(initiator.await.unwrap(), Err(GuardError::Cancelled)));
    assert!(matches!(queued.await.unwrap(), Err(GuardError::Cancelled)));
    assert!(!h.coordinator.is_refreshing());
    assert_eq!(h.coordinator.queue_len(), 0);
    assert_eq!(h.coordinator.circuit_state(), CircuitState::Closed);

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        h.coordinator
            .handle_failure(&ApiRequest::get("/api/again"), unauthorized()),
    )
    .await
    .expect("coordinator accepts a new refresh")
    .unwrap();
    assert_eq!(response.text(), "/api/again");
    assert_eq!(h.transport.refresh_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_replay_does_not_affect_siblings() {
    let config = test_config();
    let h = harness(
        &config,
        MockTransport::new(|req| match (req.is_retry, req.path.as_str()) {
            (true, "/api/broken") => Err(TransportError::from_status(500)),
            (true, path) => Ok(ApiResponse::new(200, path.to_string())),
            (false, _) => Err(unauthorized()),
        })
        .with_refresh_delay(Duration::from_millis(200)),
    );

    let coordinator = h.coordinator.clone();
    let initiator = tokio::spawn(async move {
        coordinator
            .handle_failure(&ApiRequest::get("/api/initiator"), unauthorized())
            .await
    });
    wait_until(|| h.coordinator.is_refreshing()).await;

    let mut queued = Vec::new();
    for path in ["/api/first", "/api/broken", "/api/last"] {
        let coordinator = h.coordinator.clone();
        let expected = queued.len() + 1;
        queued.push(tokio::spawn(async move {
            coordinator.handle_failure(&ApiRequest::get(path), unauthorized()).await
        }));
        wait_until(|| h.coordinator.queue_len() == expected).await;
    }

    let outcomes: Vec<_> = futures_util::future::join_all(queued)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    assert_eq!(outcomes[0].as_ref().unwrap().text(), "/api/first");
    assert!(matches!(outcomes[1], Err(GuardError::Replay(ref e)) if e.status() == Some(500)));
    assert_eq!(outcomes[2].as_ref().unwrap().text(), "/api/last");
    assert_eq!(initiator.await.unwrap().unwrap().text(), "/api/initiator");

    assert_eq!(h.transport.refresh_calls(), 1);
    assert_eq!(h.transport.replays().len(), 4);
    assert!(!h.coordinator.is_refreshing());
}
