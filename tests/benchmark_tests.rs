//! Performance benchmarks for the admission engine's hot paths

use server::deferral::ClientDeferral;
use shared::DeferralEvent;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

fn drain_count(rx: &mut mpsc::UnboundedReceiver<DeferralEvent>) -> usize {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}

/// Benchmarks the aggregation pass with an unusually large gate roster.
/// Every completion triggers a full pass, so this is quadratic on purpose.
#[test]
fn benchmark_aggregation_with_many_gates() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let deferral = Arc::new(ClientDeferral::new(1, tx));

    let gates = 1_000;
    for i in 0..gates {
        deferral.register(&format!("gate-{}", i), "benchmark gate");
    }
    deferral.mark_events_run();

    let start = Instant::now();
    for i in 0..gates {
        deferral.complete(&format!("gate-{}", i));
    }
    let duration = start.elapsed();

    println!(
        "Aggregation: {} gates completed in {:?} ({:.2} µs/completion)",
        gates,
        duration,
        duration.as_micros() as f64 / gates as f64
    );

    assert!(deferral.is_completed());
    assert_eq!(drain_count(&mut rx), 1); // exactly the resolution

    // Even the quadratic worst case should finish well under 2 seconds.
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the cost of one complete evaluation, repeated many times.
#[test]
fn benchmark_deferral_churn() {
    let iterations: u32 = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let deferral = Arc::new(ClientDeferral::new(i, tx));
        deferral.register("only", "churn gate");
        deferral.mark_events_run();
        deferral.complete("only");
        assert_eq!(drain_count(&mut rx), 1);
    }

    let duration = start.elapsed();
    println!(
        "Churn: {} evaluations in {:?} ({:.2} µs/evaluation)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks handover writes, the chattiest data path gates share.
#[test]
fn benchmark_handover_writes() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let deferral = Arc::new(ClientDeferral::new(1, tx));
    deferral.register("writer", "");

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let key = format!("key-{}", i % 100);
        deferral.set_handover(&key, r#"{"payload":"benchmark"}"#);
    }

    let duration = start.elapsed();
    println!(
        "Handover: {} writes in {:?} ({:.2} µs/write)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(deferral.handover().len(), 100);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks progress updates with the duplicate-suppression path active.
#[test]
fn benchmark_progress_updates() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let deferral = Arc::new(ClientDeferral::new(1, tx));
    deferral.register("queue", "");

    let iterations: usize = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        // Two writes per distinct text: the second must be suppressed.
        let message = format!("position {}", i / 2);
        deferral.update("queue", &message);
    }

    let duration = start.elapsed();
    println!(
        "Progress: {} updates in {:?} ({:.2} µs/update)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(drain_count(&mut rx), iterations / 2);
    assert!(duration.as_millis() < 1000);
}
