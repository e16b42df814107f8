use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

#[test]
fn test_basic_capture_message() {
    let mut last_event_id = None::<Uuid>;
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.set_tag("worker", "worker1");
        });
        flare::capture_message("Hello World!", flare::Level::Warning);
        last_event_id = flare::last_event_id();
    });
    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap();
    assert_eq!(event.message.unwrap(), "Hello World!");
    assert_eq!(event.level, flare::Level::Warning);
    assert_eq!(
        event.tags.into_iter().collect::<Vec<(String, String)>>(),
        vec![("worker".to_string(), "worker1".to_string())]
    );

    assert_eq!(Some(event.event_id), last_event_id);
}

#[test]
fn test_breadcrumbs() {
    let events = flare::test::with_captured_events(|| {
        flare::add_breadcrumb(|| flare::Breadcrumb {
            ty: "log".into(),
            message: Some("First breadcrumb".into()),
            ..Default::default()
        });
        flare::add_breadcrumb(flare::Breadcrumb {
            ty: "log".into(),
            message: Some("Second breadcrumb".into()),
            ..Default::default()
        });
        flare::add_breadcrumb(|| {
            vec![
                flare::Breadcrumb {
                    ty: "log".into(),
                    message: Some("Third breadcrumb".into()),
                    ..Default::default()
                },
                flare::Breadcrumb {
                    ty: "log".into(),
                    message: Some("Fourth breadcrumb".into()),
                    ..Default::default()
                },
            ]
        });
        flare::add_breadcrumb(|| None);
        flare::capture_message("Hello World!", flare::Level::Warning);
    });
    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap();

    let messages: Vec<_> = event
        .breadcrumbs
        .iter()
        .map(|x| (x.message.as_deref().unwrap(), x.ty.as_str()))
        .collect();
    assert_eq!(
        messages,
        vec![
            ("First breadcrumb", "log"),
            ("Second breadcrumb", "log"),
            ("Third breadcrumb", "log"),
            ("Fourth breadcrumb", "log"),
        ]
    );
}

#[test]
fn test_breadcrumb_limit() {
    let options = flare::ClientOptions {
        max_breadcrumbs: 3,
        ..Default::default()
    };
    let events = flare::test::with_captured_events_options(
        || {
            for index in 0..5 {
                flare::add_breadcrumb(flare::Breadcrumb {
                    message: Some(format!("breadcrumb {index}")),
                    ..Default::default()
                });
            }
            flare::capture_message("Hello World!", flare::Level::Warning);
        },
        options,
    );
    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap();

    // the oldest breadcrumbs are discarded first
    let messages: Vec<_> = event
        .breadcrumbs
        .iter()
        .map(|x| x.message.as_deref().unwrap())
        .collect();
    assert_eq!(messages, vec!["breadcrumb 2", "breadcrumb 3", "breadcrumb 4"]);
}

#[test]
fn test_with_scope() {
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.set_tag("global", "yes");
        });
        flare::with_scope(
            |scope| scope.set_tag("local", "yes"),
            || flare::capture_message("inside", flare::Level::Info),
        );
        flare::capture_message("outside", flare::Level::Info);
    });
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].tags.get("global").map(String::as_str), Some("yes"));
    assert_eq!(events[0].tags.get("local").map(String::as_str), Some("yes"));

    // the tag set in the pushed scope must not leak into the outer scope
    assert_eq!(events[1].tags.get("global").map(String::as_str), Some("yes"));
    assert_eq!(events[1].tags.get("local"), None);
}

#[test]
fn test_reconfigure_scope() {
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.set_tag("worker", "worker1");
        });
        flare::configure_scope(|scope| {
            scope.set_tag("worker", "worker2");
        });
        flare::capture_message("Hello World!", flare::Level::Warning);
    });
    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap();
    assert_eq!(event.tags.get("worker").map(String::as_str), Some("worker2"));
}

#[test]
fn test_pop_on_root_scope_is_ignored() {
    let events = flare::test::with_captured_events(|| {
        let hub = flare::Hub::current();
        // there is no matching push, this must not unwind the stack
        hub.pop_scope();
        hub.pop_scope();
        flare::capture_message("still alive", flare::Level::Info);
    });
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message.as_deref(), Some("still alive"));
}

#[test]
fn test_factory() {
    struct CountingTransport(Arc<AtomicUsize>);

    impl flare::Transport for CountingTransport {
        fn send_envelope(&self, envelope: flare::Envelope) {
            let event = envelope.event().unwrap();
            assert_eq!(event.message.as_deref(), Some("test"));
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let events = Arc::new(AtomicUsize::new(0));

    let events_for_options = events.clone();
    let options = flare::ClientOptions {
        dsn: "http://foo@example.com/42".parse().ok(),
        transport: Some(Arc::new(
            move |opts: &flare::ClientOptions| -> Arc<dyn flare::Transport> {
                assert_eq!(opts.dsn.as_ref().unwrap().host(), "example.com");
                Arc::new(CountingTransport(events_for_options.clone()))
            },
        )),
        ..Default::default()
    };

    flare::Hub::run(
        Arc::new(flare::Hub::new(
            Some(Arc::new(options.into())),
            Arc::new(Default::default()),
        )),
        || {
            flare::capture_message("test", flare::Level::Error);
        },
    );

    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_attached_stacktrace() {
    let sampled_events = flare::test::with_captured_events(|| {
        let err = "NaN".parse::<usize>().unwrap_err();
        flare::capture_error(&err);
    });
    assert_eq!(sampled_events.len(), 1);
    let event = sampled_events.into_iter().next().unwrap();
    assert_eq!(event.exception.values.len(), 1);
    assert_eq!(event.exception.values[0].ty, "ParseIntError");
    assert_eq!(event.level, flare::Level::Error);
}

#[test]
fn test_sample_rate_zero_drops_all() {
    let events = flare::test::with_captured_events_options(
        || {
            for _ in 0..10 {
                flare::capture_message("dropped", flare::Level::Info);
            }
        },
        flare::ClientOptions {
            sample_rate: 0.0,
            ..Default::default()
        },
    );
    assert!(events.is_empty());
}
