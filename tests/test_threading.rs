use std::sync::Arc;

#[test]
fn test_hub_run_across_threads() {
    let events = flare::test::with_captured_events(|| {
        flare::configure_scope(|scope| {
            scope.set_tag("main", "yes");
        });

        let hub = Arc::new(flare::Hub::new_from_top(flare::Hub::current()));
        std::thread::spawn(move || {
            flare::Hub::run(hub, || {
                flare::configure_scope(|scope| {
                    scope.set_tag("worker", "yes");
                });
                flare::capture_message("from the worker", flare::Level::Info);
            })
        })
        .join()
        .unwrap();

        flare::capture_message("from the main thread", flare::Level::Info);
    });
    assert_eq!(events.len(), 2);

    // the worker hub starts with a copy of the top scope
    assert_eq!(events[0].message.as_deref(), Some("from the worker"));
    assert_eq!(events[0].tags.get("main").map(String::as_str), Some("yes"));
    assert_eq!(events[0].tags.get("worker").map(String::as_str), Some("yes"));

    // scope changes made in the worker must not leak back
    assert_eq!(events[1].message.as_deref(), Some("from the main thread"));
    assert_eq!(events[1].tags.get("worker"), None);
}

#[test]
fn test_nested_hub_runs() {
    let events = flare::test::with_captured_events(|| {
        let outer = flare::Hub::current();
        let inner = Arc::new(flare::Hub::new_from_top(&outer));

        flare::Hub::run(inner, || {
            flare::configure_scope(|scope| scope.set_tag("inner", "yes"));
            flare::capture_message("inner hub", flare::Level::Info);
        });

        // after the run the previous hub is restored
        flare::capture_message("outer hub", flare::Level::Info);
    });
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tags.get("inner").map(String::as_str), Some("yes"));
    assert_eq!(events[1].tags.get("inner"), None);
}

#[test]
fn test_shared_client_between_hubs() {
    let transport = flare::test::TestTransport::new();
    let options = flare::ClientOptions {
        dsn: "https://public@example.com/1".parse().ok(),
        transport: Some(Arc::new(transport.clone())),
        ..Default::default()
    };
    let client = Arc::new(flare::Client::from_config(options));

    let handles: Vec<_> = (0..4)
        .map(|index| {
            let hub = Arc::new(flare::Hub::new(
                Some(client.clone()),
                Arc::new(Default::default()),
            ));
            std::thread::spawn(move || {
                flare::Hub::run(hub, || {
                    flare::capture_message(&format!("thread {index}"), flare::Level::Info);
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(transport.fetch_and_clear_events().len(), 4);
}

#[test]
fn test_concurrent_breadcrumb_survives_configure_scope() {
    let events = flare::test::with_captured_events(|| {
        let hub = flare::Hub::current();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let worker = {
            let hub = hub.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                hub.add_breadcrumb(flare::Breadcrumb {
                    message: Some("from the worker".into()),
                    ..Default::default()
                });
            })
        };

        hub.configure_scope(|scope| {
            barrier.wait();
            // let the worker's breadcrumb contend with this callback
            std::thread::sleep(std::time::Duration::from_millis(50));
            scope.set_tag("configured", "yes");
        });
        worker.join().unwrap();

        flare::capture_message("done", flare::Level::Info);
    });

    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].tags.get("configured").map(String::as_str),
        Some("yes")
    );
    // the breadcrumb recorded by the other thread must not be lost
    assert_eq!(events[0].breadcrumbs.len(), 1);
    assert_eq!(
        events[0].breadcrumbs[0].message.as_deref(),
        Some("from the worker")
    );
}

#[test]
fn test_capture_without_client_is_noop() {
    let hub = Arc::new(flare::Hub::new(None, Arc::new(Default::default())));
    flare::Hub::run(hub, || {
        let id = flare::capture_message("into the void", flare::Level::Error);
        assert!(id.is_nil());
        assert_eq!(flare::last_event_id(), None);
    });
}
