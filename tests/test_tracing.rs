use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn traced_options() -> flare::ClientOptions {
    flare::ClientOptions {
        traces_sample_rate: 1.0,
        ..Default::default()
    }
}

#[test]
fn test_transaction_captured_on_finish() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new(
                "honk",
                "horse.neigh",
            ));
            let span = tx.start_child("db.query", "SELECT * FROM horses");
            span.finish();
            tx.finish();
        },
        traced_options(),
    );
    let transactions = flare::test::transactions_from_envelopes(envelopes);

    assert_eq!(transactions.len(), 1);
    let transaction = &transactions[0];
    assert_eq!(transaction.name.as_deref(), Some("honk"));
    assert_eq!(transaction.spans.len(), 1);
    assert_eq!(transaction.spans[0].op.as_deref(), Some("db.query"));

    let trace = match transaction.contexts.get("trace") {
        Some(flare::protocol::Context::Trace(trace)) => trace,
        other => panic!("expected trace context, got {other:?}"),
    };
    assert_eq!(trace.op.as_deref(), Some("horse.neigh"));
    assert_eq!(transaction.spans[0].trace_id, trace.trace_id);
}

#[test]
fn test_unfinished_spans_are_dropped() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("honk", "op"));
            let finished = tx.start_child("db", "one");
            let _unfinished = tx.start_child("db", "two");
            finished.finish();
            tx.finish();
        },
        traced_options(),
    );
    let transactions = flare::test::transactions_from_envelopes(envelopes);

    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].spans.len(), 1);
    assert_eq!(transactions[0].spans[0].description.as_deref(), Some("one"));
}

#[test]
fn test_unsampled_transaction_is_not_sent() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("quiet", "op"));
            let span = tx.start_child("db", "still works");
            span.finish();
            tx.finish();
        },
        flare::ClientOptions {
            traces_sample_rate: 0.0,
            ..Default::default()
        },
    );
    assert!(flare::test::transactions_from_envelopes(envelopes).is_empty());
}

#[test]
fn test_parses_trace_header() {
    let headers = [(
        "flare-trace",
        "09287c2e9dd44c2cb09d0e72167220ed-9000cec4d155dcd8-1",
    )];
    let ctx = flare::TransactionContext::continue_from_headers("noop", "noop", headers);

    assert_eq!(
        ctx.trace_id(),
        "09287c2e9dd44c2cb09d0e72167220ed".parse().unwrap()
    );
    assert_eq!(ctx.sampled(), Some(true));

    // the header name is matched case insensitively
    let headers = [(
        "FlArE-TrAcE",
        "09287c2e9dd44c2cb09d0e72167220ed-9000cec4d155dcd8-0",
    )];
    let ctx = flare::TransactionContext::continue_from_headers("noop", "noop", headers);
    assert_eq!(ctx.sampled(), Some(false));
}

#[test]
fn test_malformed_header_starts_fresh_trace() {
    for value in [
        "not-a-valid-header",
        "09287c2e9dd44c2cb09d0e72167220ed-9000cec4d155dcd8-2",
        "09287c2e9dd44c2cb09d0e72167220ed-9000cec4d155dcd8-true",
        "",
    ] {
        let ctx =
            flare::TransactionContext::continue_from_headers("noop", "noop", [("flare-trace", value)]);
        assert_ne!(
            ctx.trace_id(),
            "09287c2e9dd44c2cb09d0e72167220ed".parse().unwrap()
        );
        // a rejected header leaves the sampling decision open
        assert_eq!(ctx.sampled(), None);
    }
}

#[test]
fn test_continued_trace_keeps_sampling_decision() {
    let headers = [(
        "flare-trace",
        "09287c2e9dd44c2cb09d0e72167220ed-9000cec4d155dcd8-0",
    )];
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            // the incoming "don't sample" decision must win over the rate
            let ctx = flare::TransactionContext::continue_from_headers("cont", "op", headers);
            flare::start_transaction(ctx).finish();
        },
        traced_options(),
    );
    assert!(flare::test::transactions_from_envelopes(envelopes).is_empty());
}

#[test]
fn test_propagated_header_round_trip() {
    flare::test::with_captured_envelopes_options(
        || {
            let outer_ctx = flare::TransactionContext::new("outer", "op");
            let trace_id = outer_ctx.trace_id();
            let tx = flare::start_transaction(outer_ctx);

            let headers: Vec<(String, String)> = tx
                .iter_headers()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            let ctx = flare::TransactionContext::continue_from_headers(
                "inner",
                "op",
                headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            );

            assert_eq!(ctx.trace_id(), trace_id);
            assert_eq!(ctx.sampled(), Some(true));
            tx.finish();
        },
        traced_options(),
    );
}

#[test]
fn test_traces_sampler() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            flare::start_transaction(flare::TransactionContext::new("wanted", "op")).finish();
            flare::start_transaction(flare::TransactionContext::new("unwanted", "op")).finish();
        },
        flare::ClientOptions {
            traces_sampler: Some(Arc::new(|ctx| {
                if ctx.name() == "wanted" {
                    1.0
                } else {
                    0.0
                }
            })),
            ..Default::default()
        },
    );
    let transactions = flare::test::transactions_from_envelopes(envelopes);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].name.as_deref(), Some("wanted"));
}

#[test]
fn test_panicking_traces_sampler_falls_back_to_rate() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            flare::start_transaction(flare::TransactionContext::new("resilient", "op")).finish();
        },
        flare::ClientOptions {
            traces_sample_rate: 1.0,
            traces_sampler: Some(Arc::new(|_| panic!("broken sampler"))),
            ..Default::default()
        },
    );
    let transactions = flare::test::transactions_from_envelopes(envelopes);
    assert_eq!(transactions.len(), 1);
}

#[test]
fn test_span_limit() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("busy", "op"));
            for index in 0..1200 {
                let span = tx.start_child("work", &format!("unit {index}"));
                span.finish();
            }
            tx.finish();
        },
        traced_options(),
    );
    let transactions = flare::test::transactions_from_envelopes(envelopes);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].spans.len(), 1000);
}

#[test]
fn test_event_gets_trace_context() {
    let events = flare::test::with_captured_events_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("traced", "op"));
            flare::configure_scope(|scope| scope.set_span(Some(tx.clone().into())));
            flare::capture_message("within a transaction", flare::Level::Info);
            tx.finish();
        },
        traced_options(),
    );
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0].contexts.get("trace"),
        Some(flare::protocol::Context::Trace(_))
    ));
}

#[test]
fn test_latest_active_span_selection() {
    flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("select", "op"));
            // with no children the transaction itself is the active span
            let tx_header = tx.iter_headers().next().unwrap().1;
            assert_eq!(
                tx.latest_active_span().iter_headers().next().unwrap().1,
                tx_header
            );

            let first = tx.start_child("db", "first");
            let second = tx.start_child("db", "second");
            second.finish();

            // the most recently started span that is still running wins
            assert_eq!(
                tx.latest_active_span().iter_headers().next().unwrap().1,
                first.iter_headers().next().unwrap().1
            );

            first.finish();
            tx.finish();
        },
        traced_options(),
    );
}

#[test]
fn test_event_attaches_to_latest_active_span() {
    let active_span_id = Arc::new(std::sync::Mutex::new(String::new()));
    let recorded = active_span_id.clone();
    let events = flare::test::with_captured_events_options(
        move || {
            let tx = flare::start_transaction(flare::TransactionContext::new("traced", "op"));
            flare::configure_scope(|scope| scope.set_span(Some(tx.clone().into())));

            let span = tx.start_child("db", "running");
            let finished = tx.start_child("db", "done");
            finished.finish();

            let header = span.iter_headers().next().unwrap().1;
            *recorded.lock().unwrap() = header.split('-').nth(1).unwrap().to_string();

            flare::capture_message("mid-span", flare::Level::Info);

            span.finish();
            tx.finish();
        },
        traced_options(),
    );

    assert_eq!(events.len(), 1);
    let trace = match events[0].contexts.get("trace") {
        Some(flare::protocol::Context::Trace(trace)) => trace,
        other => panic!("expected trace context, got {other:?}"),
    };
    assert_eq!(trace.span_id.to_string(), *active_span_id.lock().unwrap());
}

#[test]
fn test_continue_from_span_joins_the_trace() {
    let envelopes = flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("parent", "op"));
            let ctx = flare::TransactionContext::continue_from_span(
                "worker",
                "task",
                Some(tx.latest_active_span()),
            );
            // the handed-off context carries the trace and the decision
            assert_eq!(ctx.sampled(), Some(true));

            let worker = flare::start_transaction(ctx);
            worker.finish();
            tx.finish();
        },
        traced_options(),
    );
    let transactions = flare::test::transactions_from_envelopes(envelopes);
    assert_eq!(transactions.len(), 2);

    let trace_of = |name: &str| {
        let transaction = transactions
            .iter()
            .find(|t| t.name.as_deref() == Some(name))
            .unwrap();
        match transaction.contexts.get("trace") {
            Some(flare::protocol::Context::Trace(trace)) => trace.clone(),
            other => panic!("expected trace context, got {other:?}"),
        }
    };
    let parent = trace_of("parent");
    let worker = trace_of("worker");
    assert_eq!(worker.trace_id, parent.trace_id);
    assert_eq!(worker.parent_span_id, Some(parent.span_id));
}

#[test]
fn test_sampling_decided_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_sampler = calls.clone();
    flare::test::with_captured_envelopes_options(
        || {
            let tx = flare::start_transaction(flare::TransactionContext::new("once", "op"));
            let child = tx.start_child("db", "nested");
            let grandchild = child.start_child("db", "deeper");
            grandchild.finish();
            child.finish();
            tx.finish();
        },
        flare::ClientOptions {
            traces_sampler: Some(Arc::new(move |_| {
                calls_in_sampler.fetch_add(1, Ordering::SeqCst);
                1.0
            })),
            ..Default::default()
        },
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
