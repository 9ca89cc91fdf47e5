#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::time::Duration;

    /// Poll `check` until it holds or two seconds pass.
    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    async fn within<T>(fut: impl Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("operation hung")
    }

    // ── Transport ──────────────────────────────────────────────

    mod transport {
        use super::{eventually, within};
        use parking_lot::Mutex;
        use rein_cdp::mock::{MockBrowser, MockReply, RecordedCommand};
        use rein_config::TransportConfig;
        use rein_core::ReinError;
        use serde_json::json;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::mpsc;

        fn hang_on(method: &'static str) -> rein_cdp::mock::Responder {
            Arc::new(move |cmd: &RecordedCommand| {
                if cmd.method == method {
                    MockReply::NoReply
                } else {
                    MockReply::Result(json!({ "method": cmd.method }))
                }
            })
        }

        #[tokio::test]
        async fn test_send_returns_result() {
            let (transport, _browser) =
                MockBrowser::pair(&TransportConfig::default(), hang_on("never")).await;
            let result = within(transport.send("Browser.getVersion", json!({})))
                .await
                .unwrap();
            assert_eq!(result["method"], "Browser.getVersion");
            assert_eq!(transport.pending_count(), 0);
        }

        #[tokio::test]
        async fn test_stalled_handshake_times_out() {
            // Accepts TCP but never answers the upgrade request.
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let _acceptor = tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            });

            let config = TransportConfig {
                command_timeout_secs: 1,
                ..Default::default()
            };
            let outcome = within(rein_cdp::Transport::connect(&format!("ws://{addr}/devtools"), &config)).await;
            match outcome {
                Err(ReinError::WebSocket(message)) => assert!(message.contains("did not complete")),
                Err(other) => panic!("expected websocket error, got {other:?}"),
                Ok(_) => panic!("handshake should not succeed"),
            }
        }

        #[tokio::test]
        async fn test_protocol_error_is_distinguishable() {
            let responder: rein_cdp::mock::Responder = Arc::new(|_: &RecordedCommand| {
                MockReply::Error {
                    code: -32601,
                    message: "'Nope.nope' wasn't found".into(),
                }
            });
            let (transport, _browser) =
                MockBrowser::pair(&TransportConfig::default(), responder).await;
            match within(transport.send("Nope.nope", json!({}))).await {
                Err(ReinError::Protocol { code, .. }) => assert_eq!(code, -32601),
                other => panic!("expected protocol error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_out_of_order_responses_correlate() {
            let (transport, browser) =
                MockBrowser::pair(&TransportConfig::default(), hang_on("Slow.call")).await;
            let transport = Arc::new(transport);

            let slow = {
                let t = Arc::clone(&transport);
                tokio::spawn(async move { t.send("Slow.call", json!({})).await })
            };
            assert!(eventually(|| !browser.commands_named("Slow.call").is_empty()).await);

            let fast = within(transport.send("Fast.call", json!({}))).await.unwrap();
            assert_eq!(fast["method"], "Fast.call");

            let slow_id = browser.commands_named("Slow.call")[0].id;
            browser.send_raw(&format!(r#"{{"id":{slow_id},"result":{{"late":true}}}}"#));
            let slow = within(slow).await.unwrap().unwrap();
            assert_eq!(slow["late"], true);
        }

        #[tokio::test]
        async fn test_close_rejects_every_pending_request() {
            let (transport, browser) =
                MockBrowser::pair(&TransportConfig::default(), hang_on("Hang.forever")).await;
            let transport = Arc::new(transport);

            let callers: Vec<_> = (0..2)
                .map(|_| {
                    let t = Arc::clone(&transport);
                    tokio::spawn(async move { t.send("Hang.forever", json!({})).await })
                })
                .collect();
            assert!(eventually(|| browser.commands_named("Hang.forever").len() == 2).await);
            assert_eq!(transport.pending_count(), 2);

            browser.close();

            for caller in callers {
                let outcome = within(caller).await.unwrap();
                assert!(
                    matches!(outcome, Err(ReinError::ConnectionClosed)),
                    "got {outcome:?}"
                );
            }
            assert!(transport.is_closed());
            assert_eq!(transport.pending_count(), 0);
        }

        #[tokio::test]
        async fn test_send_after_close_fails_fast() {
            let (transport, browser) = MockBrowser::echo(&TransportConfig::default()).await;
            browser.close();
            let t = &transport;
            assert!(eventually(|| t.is_closed()).await);
            let outcome = within(transport.send("Page.enable", json!({}))).await;
            assert!(matches!(outcome, Err(ReinError::ConnectionClosed)));
        }

        #[tokio::test]
        async fn test_command_timeout_clears_pending() {
            let config = TransportConfig {
                command_timeout_secs: 1,
                ..Default::default()
            };
            let (transport, _browser) = MockBrowser::pair(&config, hang_on("Hang.forever")).await;
            match within(transport.send("Hang.forever", json!({}))).await {
                Err(ReinError::CommandTimeout { method, timeout_ms }) => {
                    assert_eq!(method, "Hang.forever");
                    assert_eq!(timeout_ms, 1000);
                }
                other => panic!("expected timeout, got {other:?}"),
            }
            assert_eq!(transport.pending_count(), 0);
        }

        #[tokio::test]
        async fn test_events_are_not_taken_for_responses() {
            let (transport, browser) =
                MockBrowser::pair(&TransportConfig::default(), hang_on("Hang.forever")).await;
            let transport = Arc::new(transport);
            let mut events = transport.events();

            let pending = {
                let t = Arc::clone(&transport);
                tokio::spawn(async move { t.send("Hang.forever", json!({})).await })
            };
            assert!(eventually(|| !browser.commands_named("Hang.forever").is_empty()).await);

            browser.emit("Page.loadEventFired", json!({ "timestamp": 1.0 }), Some("S1"));
            let event = within(events.recv()).await.unwrap();
            assert_eq!(event.method, "Page.loadEventFired");
            assert_eq!(event.session_id.as_deref(), Some("S1"));

            assert_eq!(transport.pending_count(), 1);
            assert!(!pending.is_finished());
            pending.abort();
        }

        #[tokio::test]
        async fn test_subscribe_filters_by_method() {
            let (transport, browser) = MockBrowser::echo(&TransportConfig::default()).await;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let _sub = transport.subscribe("Target.targetCreated", move |event| {
                tx.send(event.method.clone())?;
                Ok(())
            });

            browser.emit("Target.targetInfoChanged", json!({}), None);
            browser.emit("Target.targetCreated", json!({}), None);
            assert_eq!(within(rx.recv()).await.unwrap(), "Target.targetCreated");
        }

        #[tokio::test]
        async fn test_panicking_handler_is_isolated() {
            let (transport, browser) = MockBrowser::echo(&TransportConfig::default()).await;
            let calls = Arc::new(AtomicUsize::new(0));
            let seen = Arc::new(Mutex::new(Vec::new()));

            let counter = Arc::clone(&calls);
            let panicky = transport.subscribe("Runtime.consoleAPICalled", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("handler bug");
            });
            let sink = Arc::clone(&seen);
            let _failing = transport.subscribe_all(move |event| {
                sink.lock().push(event.method.clone());
                anyhow::bail!("handler error")
            });

            browser.emit("Runtime.consoleAPICalled", json!({}), None);
            browser.emit("Runtime.consoleAPICalled", json!({}), None);

            assert!(eventually(|| calls.load(Ordering::SeqCst) == 2).await);
            assert!(eventually(|| seen.lock().len() == 2).await);
            assert!(panicky.is_active());

            // The read loop is unaffected.
            within(transport.send("Page.enable", json!({}))).await.unwrap();
        }
    }

    // ── Session registry ───────────────────────────────────────

    mod registry {
        use super::{eventually, within};
        use rein_cdp::mock::{
            self, MockBrowser, MockReply, RecordedCommand, attached_event, chrome_responder,
            detached_event,
        };
        use rein_cdp::{NavigationReadiness, SessionRegistry, Transport};
        use rein_config::{SessionConfig, TransportConfig};
        use rein_core::{Event, EventBus, ReinError};
        use serde_json::json;
        use std::sync::Arc;
        use std::time::Duration;

        fn fast_config() -> SessionConfig {
            SessionConfig {
                attach_timeout_ms: 300,
                focus_recovery_timeout_ms: 200,
                lifecycle_poll_ms: 10,
                same_origin_nav_timeout_ms: 200,
                cross_origin_nav_timeout_ms: 400,
                ..Default::default()
            }
        }

        async fn boot(
            pages: &[(&str, &str)],
        ) -> (SessionRegistry, MockBrowser, Arc<Transport>, EventBus) {
            boot_with(chrome_responder(pages)).await
        }

        async fn boot_with(
            responder: mock::Responder,
        ) -> (SessionRegistry, MockBrowser, Arc<Transport>, EventBus) {
            let (transport, browser) =
                MockBrowser::pair(&TransportConfig::default(), responder).await;
            let transport = Arc::new(transport);
            let bus = EventBus::default();
            let registry =
                within(SessionRegistry::bootstrap(Arc::clone(&transport), fast_config(), bus.clone()))
                    .await
                    .unwrap();
            (registry, browser, transport, bus)
        }

        fn emit(browser: &MockBrowser, event: rein_cdp::CdpEvent) {
            browser.emit(&event.method, event.params, event.session_id.as_deref());
        }

        #[tokio::test]
        async fn test_bootstrap_attaches_pages_and_focuses_first() {
            let (registry, browser, _t, _bus) =
                boot(&[("P1", "https://a.test/"), ("P2", "https://b.test/")]).await;

            assert_eq!(registry.focused_target().as_deref(), Some("P1"));
            assert!(registry.session("P1").is_some());
            assert!(registry.session("P2").is_some());

            let auto = browser.commands_named("Target.setAutoAttach");
            assert_eq!(auto.len(), 1);
            assert_eq!(auto[0].params["flatten"], true);
            assert_eq!(auto[0].params["waitForDebuggerOnStart"], false);
            for attach in browser.commands_named("Target.attachToTarget") {
                assert_eq!(attach.params["flatten"], true);
            }
        }

        #[tokio::test]
        async fn test_session_commands_carry_session_id() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            let session = registry.get_or_create_session(None, false).await.unwrap();
            session.send("DOM.getDocument", json!({})).await.unwrap();

            let sent = browser.commands_named("DOM.getDocument");
            assert_eq!(sent[0].session_id.as_deref(), Some("S-P1"));
        }

        #[tokio::test]
        async fn test_iframe_never_takes_focus() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;

            emit(&browser, attached_event("IF1", "iframe", "https://ads.test/frame"));
            assert!(eventually(|| registry.session("IF1").is_some()).await);
            assert_eq!(registry.focused_target().as_deref(), Some("P1"));

            match registry.set_focus("IF1") {
                Err(ReinError::InvalidFocus { kind, .. }) => assert_eq!(kind, "iframe"),
                other => panic!("expected InvalidFocus, got {other:?}"),
            }
            let err = registry
                .get_or_create_session(Some("IF1"), true)
                .await
                .unwrap_err();
            assert!(matches!(err, ReinError::InvalidFocus { .. }));
            assert_eq!(registry.focused_target().as_deref(), Some("P1"));

            // A session without focus is still fine.
            assert!(registry.get_or_create_session(Some("IF1"), false).await.is_ok());
        }

        #[tokio::test]
        async fn test_new_page_attach_does_not_steal_focus() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            emit(&browser, attached_event("POPUP", "page", "https://a.test/popup"));
            assert!(eventually(|| registry.session("POPUP").is_some()).await);
            assert_eq!(registry.focused_target().as_deref(), Some("P1"));
        }

        #[tokio::test]
        async fn test_detach_invalidates_sessions_and_focus() {
            let (registry, browser, _t, bus) = boot(&[("P1", "https://a.test/")]).await;
            let mut events = bus.subscribe();
            let session = registry.session("P1").unwrap();

            emit(&browser, detached_event("P1"));
            assert!(eventually(|| registry.target("P1").is_none()).await);

            assert!(!session.is_alive());
            assert!(registry.session("P1").is_none());
            assert!(registry.focused_target().is_none());
            assert!(matches!(
                session.send("Page.reload", json!({})).await,
                Err(ReinError::TargetDetached(_))
            ));

            let mut saw_detach = false;
            let mut saw_focus_cleared = false;
            while let Ok(event) = events.try_recv() {
                match event {
                    Event::TargetDetached { target_id } => saw_detach = target_id == "P1",
                    Event::FocusChanged { target_id: None } => saw_focus_cleared = true,
                    _ => {}
                }
            }
            assert!(saw_detach && saw_focus_cleared);
        }

        #[tokio::test]
        async fn test_reattach_yields_fresh_session() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            let old = registry.session("P1").unwrap();
            emit(&browser, detached_event("P1"));
            assert!(eventually(|| registry.session("P1").is_none()).await);

            browser.emit(
                "Target.attachedToTarget",
                json!({
                    "sessionId": "S-P1-again",
                    "targetInfo": mock::target_info("P1", "page", "https://a.test/"),
                    "waitingForDebugger": false,
                }),
                None,
            );
            assert!(eventually(|| registry.session("P1").is_some()).await);
            let new = registry.session("P1").unwrap();
            assert_eq!(new.session_id(), "S-P1-again");
            assert!(!old.is_alive());
        }

        #[tokio::test]
        async fn test_ensure_valid_focus_recovers_most_recent_page() {
            let (registry, browser, _t, _bus) =
                boot(&[("P1", "https://a.test/"), ("P2", "https://b.test/")]).await;
            emit(&browser, attached_event("P3", "page", "https://c.test/"));
            emit(&browser, attached_event("W1", "service_worker", "https://c.test/sw.js"));
            assert!(eventually(|| registry.session("W1").is_some()).await);

            emit(&browser, detached_event("P1"));
            assert!(eventually(|| registry.focused_target().is_none()).await);

            assert!(registry.ensure_valid_focus(Duration::from_millis(500)).await);
            assert_eq!(registry.focused_target().as_deref(), Some("P3"));
        }

        #[tokio::test]
        async fn test_ensure_valid_focus_gives_up() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            emit(&browser, attached_event("IF1", "iframe", "https://a.test/frame"));
            emit(&browser, detached_event("P1"));
            assert!(eventually(|| registry.target("P1").is_none()).await);

            assert!(!registry.ensure_valid_focus(Duration::from_millis(100)).await);
            assert!(registry.focused_target().is_none());
            assert!(matches!(
                registry.get_or_create_session(None, false).await,
                Err(ReinError::NoFocus)
            ));
        }

        #[tokio::test]
        async fn test_ensure_valid_focus_waits_for_late_page() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            emit(&browser, detached_event("P1"));
            assert!(eventually(|| registry.target("P1").is_none()).await);

            let late = attached_event("P9", "page", "https://a.test/");
            let browser = Arc::new(browser);
            let b = Arc::clone(&browser);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                b.emit(&late.method, late.params, None);
            });
            assert!(registry.ensure_valid_focus(Duration::from_secs(2)).await);
            assert_eq!(registry.focused_target().as_deref(), Some("P9"));
        }

        #[tokio::test]
        async fn test_session_waits_for_attach_notification() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            let browser = Arc::new(browser);
            let b = Arc::clone(&browser);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let ev = attached_event("LATE", "page", "https://a.test/late");
                b.emit(&ev.method, ev.params, None);
            });

            let session = within(registry.get_or_create_session(Some("LATE"), true))
                .await
                .unwrap();
            assert_eq!(session.target_id(), "LATE");
            assert_eq!(registry.focused_target().as_deref(), Some("LATE"));
        }

        #[tokio::test]
        async fn test_session_wait_is_bounded() {
            let (registry, _browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            let err = within(registry.get_or_create_session(Some("GHOST"), false))
                .await
                .unwrap_err();
            assert!(matches!(err, ReinError::TargetNotFound(id) if id == "GHOST"));
        }

        #[tokio::test]
        async fn test_create_tab_focuses_new_page() {
            let (registry, _browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            let session = within(registry.create_tab("https://b.test/")).await.unwrap();
            assert_eq!(registry.focused_target().as_deref(), Some(session.target_id()));
            assert_eq!(registry.target(session.target_id()).unwrap().url, "https://b.test/");
        }

        #[tokio::test]
        async fn test_navigate_settles_on_load() {
            let (registry, _browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            let session = registry.get_or_create_session(None, false).await.unwrap();
            let readiness = within(registry.navigate(&session, "https://a.test/next"))
                .await
                .unwrap();
            assert_eq!(readiness, NavigationReadiness::Settled("load".into()));
        }

        #[tokio::test]
        async fn test_navigate_times_out_without_lifecycle() {
            let base = chrome_responder(&[("P1", "https://a.test/")]);
            let responder: mock::Responder = Arc::new(move |cmd: &RecordedCommand| {
                if cmd.method == "Page.navigate" {
                    MockReply::Result(json!({ "frameId": "F", "loaderId": "STUCK" }))
                } else {
                    base(cmd)
                }
            });
            let (registry, _browser, _t, _bus) = boot_with(responder).await;
            let session = registry.get_or_create_session(None, false).await.unwrap();

            let started = std::time::Instant::now();
            let readiness = within(registry.navigate(&session, "https://a.test/slow"))
                .await
                .unwrap();
            assert_eq!(readiness, NavigationReadiness::TimedOut);
            // Same origin uses the shorter bound.
            assert!(started.elapsed() < Duration::from_millis(400));
        }

        #[tokio::test]
        async fn test_navigate_error_text_is_action_failure() {
            let base = chrome_responder(&[("P1", "https://a.test/")]);
            let responder: mock::Responder = Arc::new(move |cmd: &RecordedCommand| {
                if cmd.method == "Page.navigate" {
                    MockReply::Result(json!({ "frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
                } else {
                    base(cmd)
                }
            });
            let (registry, _browser, _t, _bus) = boot_with(responder).await;
            let session = registry.get_or_create_session(None, false).await.unwrap();
            let err = registry
                .navigate(&session, "https://nowhere.invalid/")
                .await
                .unwrap_err();
            assert!(matches!(err, ReinError::ActionFailed { .. }));
        }

        #[tokio::test]
        async fn test_target_info_changes_update_url() {
            let (registry, browser, _t, _bus) = boot(&[("P1", "https://a.test/")]).await;
            browser.emit(
                "Target.targetInfoChanged",
                json!({ "targetInfo": mock::target_info("P1", "page", "https://a.test/moved") }),
                None,
            );
            assert!(
                eventually(|| registry.target("P1").is_some_and(|t| t.url == "https://a.test/moved"))
                    .await
            );
        }
    }

    // ── Connection pool ────────────────────────────────────────

    mod pool {
        use super::{eventually, within};
        use rein_cdp::ConnectionPool;
        use rein_cdp::mock::MockConnector;
        use rein_config::PoolConfig;
        use std::sync::Arc;
        use std::time::Duration;

        fn pool_config(idle_ttl_secs: u64) -> PoolConfig {
            PoolConfig {
                idle_ttl_secs,
                sweep_interval_secs: 3600,
            }
        }

        #[tokio::test]
        async fn test_acquire_reuses_live_connection() {
            let connector = Arc::new(MockConnector::new(&[("P1", "https://a.test/")]));
            let pool = ConnectionPool::new(connector.clone(), &pool_config(300));

            let first = within(pool.acquire("ws://browser-a")).await.unwrap();
            let second = within(pool.acquire("ws://browser-a")).await.unwrap();
            assert!(Arc::ptr_eq(first.transport(), second.transport()));
            assert_eq!(connector.connects(), 1);
            assert_eq!(first.registry().focused_target().as_deref(), Some("P1"));

            within(pool.acquire("ws://browser-b")).await.unwrap();
            assert_eq!(connector.connects(), 2);
            assert_eq!(pool.len().await, 2);
        }

        #[tokio::test]
        async fn test_dead_connection_is_replaced() {
            let connector = Arc::new(MockConnector::new(&[("P1", "https://a.test/")]));
            let pool = ConnectionPool::new(connector.clone(), &pool_config(300));

            let first = within(pool.acquire("ws://browser")).await.unwrap();
            connector.browser(0).unwrap().close();
            assert!(eventually(|| !first.is_alive()).await);

            let second = within(pool.acquire("ws://browser")).await.unwrap();
            assert!(second.is_alive());
            assert!(!Arc::ptr_eq(first.transport(), second.transport()));
            assert_eq!(connector.connects(), 2);
            assert_eq!(pool.len().await, 1);
        }

        #[tokio::test]
        async fn test_sweep_closes_idle_connections() {
            let connector = Arc::new(MockConnector::new(&[("P1", "https://a.test/")]));
            let pool = ConnectionPool::new(connector.clone(), &pool_config(0));

            let conn = within(pool.acquire("ws://browser")).await.unwrap();
            assert_eq!(pool.sweep().await, 1);
            assert!(pool.is_empty().await);
            assert!(!conn.is_alive());
        }

        #[tokio::test]
        async fn test_sweep_keeps_fresh_connections() {
            let connector = Arc::new(MockConnector::new(&[("P1", "https://a.test/")]));
            let pool = ConnectionPool::new(connector.clone(), &pool_config(300));
            within(pool.acquire("ws://browser")).await.unwrap();
            assert_eq!(pool.sweep().await, 0);
            assert_eq!(pool.len().await, 1);
        }

        #[tokio::test]
        async fn test_slow_connect_does_not_block_other_keys() {
            let connector = Arc::new(
                MockConnector::new(&[("P1", "https://a.test/")])
                    .with_delay("ws://slow", Duration::from_secs(3600)),
            );
            let pool = Arc::new(ConnectionPool::new(connector.clone(), &pool_config(300)));

            let stalled = {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire("ws://slow").await })
            };
            tokio::time::sleep(Duration::from_millis(50)).await;

            let fast = tokio::time::timeout(Duration::from_secs(2), pool.acquire("ws://fast")).await;
            assert!(fast.is_ok_and(|r| r.is_ok()));
            let swept = tokio::time::timeout(Duration::from_secs(1), pool.sweep()).await;
            assert_eq!(swept.ok(), Some(0));
            assert_eq!(pool.len().await, 2);
            assert_eq!(connector.connects(), 1);
            stalled.abort();
        }

        #[tokio::test]
        async fn test_concurrent_acquire_connects_once() {
            let connector = Arc::new(
                MockConnector::new(&[("P1", "https://a.test/")])
                    .with_delay("ws://browser", Duration::from_millis(200)),
            );
            let pool = ConnectionPool::new(connector.clone(), &pool_config(300));

            let (first, second) = within(async {
                tokio::join!(pool.acquire("ws://browser"), pool.acquire("ws://browser"))
            })
            .await;
            let (first, second) = (first.unwrap(), second.unwrap());
            assert!(Arc::ptr_eq(first.transport(), second.transport()));
            assert_eq!(connector.connects(), 1);
            assert_eq!(pool.len().await, 1);
        }

        #[tokio::test]
        async fn test_background_sweeper_evicts_idle_connections() {
            let connector = Arc::new(MockConnector::new(&[("P1", "https://a.test/")]));
            let config = PoolConfig {
                idle_ttl_secs: 0,
                sweep_interval_secs: 1,
            };
            let pool = ConnectionPool::new(connector.clone(), &config);

            let conn = within(pool.acquire("ws://browser")).await.unwrap();
            let mut evicted = false;
            for _ in 0..40 {
                if pool.is_empty().await {
                    evicted = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            assert!(evicted, "sweeper never ran");
            assert!(!conn.is_alive());
        }

        #[tokio::test]
        async fn test_remove_closes_connection() {
            let connector = Arc::new(MockConnector::new(&[("P1", "https://a.test/")]));
            let pool = ConnectionPool::new(connector.clone(), &pool_config(300));
            let conn = within(pool.acquire("ws://browser")).await.unwrap();
            assert!(pool.remove("ws://browser").await);
            assert!(!pool.remove("ws://browser").await);
            assert!(!conn.is_alive());
        }
    }
}
