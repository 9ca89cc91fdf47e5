#[cfg(test)]
mod tests {
    // ── Errors ─────────────────────────────────────────────────

    mod error {
        use rein_core::ReinError;

        #[test]
        fn test_transport_fatal_classification() {
            assert!(ReinError::ConnectionClosed.is_transport_fatal());
            assert!(ReinError::WebSocket("reset".into()).is_transport_fatal());
            assert!(!ReinError::TargetNotFound("t1".into()).is_transport_fatal());
        }

        #[test]
        fn test_fallback_triggers() {
            assert!(ReinError::RateLimited("429".into()).triggers_fallback());
            assert!(ReinError::DecisionAuth("401".into()).triggers_fallback());
            assert!(!ReinError::MalformedDecision("no actions".into()).triggers_fallback());
            assert!(!ReinError::DecisionTimeout { timeout_secs: 5 }.triggers_fallback());
        }

        #[test]
        fn test_display_messages() {
            let err = ReinError::InvalidFocus {
                target_id: "F1".into(),
                kind: "iframe".into(),
            };
            assert!(err.to_string().contains("iframe"));
            assert_eq!(ReinError::ConnectionClosed.to_string(), "connection closed");
        }
    }

    // ── Types ──────────────────────────────────────────────────

    mod types {
        use rein_core::TargetType;

        #[test]
        fn test_target_type_from_cdp() {
            assert_eq!(TargetType::from_cdp("page"), TargetType::Page);
            assert_eq!(TargetType::from_cdp("iframe"), TargetType::Iframe);
            assert_eq!(TargetType::from_cdp("service_worker"), TargetType::Worker);
            assert_eq!(
                TargetType::from_cdp("browser"),
                TargetType::Other("browser".into())
            );
        }

        #[test]
        fn test_only_pages_are_focusable() {
            assert!(TargetType::Page.is_focusable());
            assert!(!TargetType::Iframe.is_focusable());
            assert!(!TargetType::Worker.is_focusable());
            assert!(!TargetType::Tab.is_focusable());
        }
    }

    // ── History ────────────────────────────────────────────────

    mod history {
        use chrono::Utc;
        use rein_core::{
            ActionRecord, ActionResult, AgentHistory, DomElement, ElementFingerprint, StepRecord,
        };
        use serde_json::json;
        use uuid::Uuid;

        fn sample_step(step: u32) -> StepRecord {
            let element = DomElement::new(4, "a", "/html/body/nav/a[2]")
                .with_attribute("href", "/pricing")
                .with_attribute("class", "nav-link active")
                .with_name("Pricing");
            StepRecord {
                step,
                url: "https://example.com/".into(),
                actions: vec![ActionRecord::new("click", json!({"index": 4}))],
                fingerprints: vec![Some(element.fingerprint())],
                results: vec![ActionResult::ok()],
                thinking: Some("open pricing".into()),
                started_at: Utc::now(),
                finished_at: Utc::now(),
            }
        }

        #[test]
        fn test_fingerprints_survive_storage_byte_identical() {
            let mut history = AgentHistory::new(Uuid::new_v4(), "find pricing");
            history.append(sample_step(0));

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("runs").join("history.json");
            history.save(&path).unwrap();
            let restored = AgentHistory::load(&path).unwrap();

            let before: &ElementFingerprint = history.steps()[0].fingerprint(0).unwrap();
            let after: &ElementFingerprint = restored.steps()[0].fingerprint(0).unwrap();
            assert_eq!(before, after);
            assert_eq!(
                serde_json::to_string(before).unwrap(),
                serde_json::to_string(after).unwrap()
            );
            assert_eq!(restored, history);
        }

        #[test]
        fn test_terminal_record() {
            let mut history = AgentHistory::new(Uuid::new_v4(), "task");
            history.append(sample_step(0));
            history.append(StepRecord::terminal(1, "https://example.com/", "loop detected"));
            assert_eq!(history.final_error(), Some("loop detected"));
            assert!(!history.is_successful());
        }

        #[test]
        fn test_successful_done() {
            let mut history = AgentHistory::new(Uuid::new_v4(), "task");
            let mut step = sample_step(0);
            step.actions = vec![ActionRecord::done(true, "all good")];
            step.fingerprints = vec![None];
            step.results = vec![ActionResult::done(true, "all good")];
            history.append(step);
            assert!(history.is_successful());
            assert!(history.final_error().is_none());
        }

        #[test]
        fn test_primary_element_action() {
            let mut step = sample_step(0);
            step.actions.insert(0, ActionRecord::new("wait", json!({"seconds": 1})));
            step.fingerprints.insert(0, None);
            let (action, fp) = step.primary_element_action().unwrap();
            assert_eq!(action.name, "click");
            assert_eq!(fp.node_tag, "a");
        }
    }

    // ── Event bus ──────────────────────────────────────────────

    mod event {
        use rein_core::{Event, EventBus};
        use uuid::Uuid;

        #[tokio::test]
        async fn test_publish_subscribe() {
            let bus = EventBus::new(16);
            let mut rx = bus.subscribe();
            let run_id = Uuid::new_v4();
            bus.publish(Event::StepStarted { run_id, step: 3 });
            match rx.recv().await.unwrap() {
                Event::StepStarted { step, .. } => assert_eq!(step, 3),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        #[test]
        fn test_publish_without_subscribers() {
            let bus = EventBus::default();
            bus.publish(Event::TargetDetached {
                target_id: "T1".into(),
            });
        }
    }
}
