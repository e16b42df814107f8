use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_processors_run_in_insertion_order() {
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.add_event_processor(|mut event| {
                event.message = Some("first".into());
                Some(event)
            });
            scope.add_event_processor(|mut event| {
                if let Some(message) = event.message.take() {
                    event.message = Some(format!("{message}, then second"));
                }
                Some(event)
            });
        });
        flare::capture_message("original", flare::Level::Info);
    });
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message.as_deref(), Some("first, then second"));
}

#[test]
fn test_processor_veto() {
    let later_calls = Arc::new(AtomicUsize::new(0));
    let later_calls_in_processor = later_calls.clone();
    let mut event_id = None;

    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.add_event_processor(|_| None);
            scope.add_event_processor(move |event| {
                later_calls_in_processor.fetch_add(1, Ordering::SeqCst);
                Some(event)
            });
        });
        event_id = Some(flare::capture_message("vetoed", flare::Level::Info));
    });

    assert!(events.is_empty());
    // a veto short-circuits the chain
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    assert!(event_id.unwrap().is_nil());
}

#[test]
fn test_panicking_processor_is_skipped() {
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.add_event_processor(|_| panic!("broken processor"));
            scope.add_event_processor(|mut event| {
                event.message = Some("survived".into());
                Some(event)
            });
        });
        flare::capture_message("original", flare::Level::Info);
    });
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message.as_deref(), Some("survived"));
}

#[test]
fn test_event_data_wins_over_scope() {
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.set_tag("shared", "from-scope");
            scope.set_tag("scope-only", "from-scope");
            scope.set_extra("shared", "from-scope".into());
        });
        flare::capture_event(flare::protocol::Event {
            message: Some("tagged".into()),
            tags: [("shared".to_string(), "from-event".to_string())]
                .into_iter()
                .collect(),
            extra: [("shared".to_string(), "from-event".into())]
                .into_iter()
                .collect(),
            ..Default::default()
        });
    });
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.tags.get("shared").map(String::as_str), Some("from-event"));
    assert_eq!(event.tags.get("scope-only").map(String::as_str), Some("from-scope"));
    assert_eq!(event.extra.get("shared"), Some(&"from-event".into()));
}

#[test]
fn test_before_send() {
    let events = flare::test::with_captured_events_options(
        || {
            flare::capture_message("before send", flare::Level::Info);
            flare::capture_message("dropped entirely", flare::Level::Debug);
        },
        flare::ClientOptions {
            before_send: Some(Arc::new(|mut event| {
                if event.level == flare::Level::Debug {
                    return None;
                }
                event.message = Some("changed by before_send".into());
                Some(event)
            })),
            ..Default::default()
        },
    );
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].message.as_deref(),
        Some("changed by before_send")
    );
}

#[test]
fn test_before_breadcrumb() {
    let events = flare::test::with_captured_events_options(
        || {
            flare::add_breadcrumb(flare::Breadcrumb {
                message: Some("keep me".into()),
                ..Default::default()
            });
            flare::add_breadcrumb(flare::Breadcrumb {
                message: Some("drop me".into()),
                ..Default::default()
            });
            flare::capture_message("breadcrumbs", flare::Level::Info);
        },
        flare::ClientOptions {
            before_breadcrumb: Some(Arc::new(|breadcrumb| {
                if breadcrumb.message.as_deref() == Some("drop me") {
                    None
                } else {
                    Some(breadcrumb)
                }
            })),
            ..Default::default()
        },
    );
    assert_eq!(events.len(), 1);
    let messages: Vec<_> = events[0]
        .breadcrumbs
        .iter()
        .map(|x| x.message.as_deref().unwrap())
        .collect();
    assert_eq!(messages, vec!["keep me"]);
}

#[test]
fn test_scope_observer() {
    struct Observer(Arc<AtomicUsize>);

    impl flare::ScopeObserver for Observer {
        fn breadcrumb_added(&self, breadcrumb: &flare::Breadcrumb) {
            assert_eq!(breadcrumb.message.as_deref(), Some("observed"));
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let seen = Arc::new(AtomicUsize::new(0));
    let options = flare::ClientOptions::new().add_scope_observer(Observer(seen.clone()));

    flare::test::with_captured_events_options(
        || {
            flare::add_breadcrumb(flare::Breadcrumb {
                message: Some("observed".into()),
                ..Default::default()
            });
        },
        options,
    );
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
