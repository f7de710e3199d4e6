//! End-to-end exercise of the specialization pipeline: interpreter threads
//! log observations, the worker installs guarded graphs, guard failures
//! deoptimize, and the diagnostic sink traces it all.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use selva_specializer::{
    DeoptKind, GuardId, Resumption, ShapeDescriptor, SinkDest, SpecConfig, Specializer, TargetId,
};

fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(deadline_ms) {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

#[test]
fn test_multi_thread_logging_to_install_to_deopt() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("events.log");
    let config = SpecConfig::builder()
        .no_delay(true)
        .log_capacity(8)
        .events(SinkDest::File(trace.to_str().unwrap().to_string()))
        .build();
    let mut spec = Specializer::new(config).unwrap();
    let target = TargetId(7);
    let callee = TargetId(9);

    // Three interpreter threads observe the same monomorphic behavior.
    thread::scope(|scope| {
        for thread_id in 1..=3u64 {
            let spec = &spec;
            scope.spawn(move || {
                let mut logger = spec.thread_logger(thread_id, target);
                for _ in 0..4 {
                    logger.log_arg_type(0, 0, ShapeDescriptor::concrete(11));
                    logger.log_arg_type(2, 1, ShapeDescriptor::concrete(12));
                    logger.log_invoke(20, callee, 2);
                    logger.finish_run();
                }
                // Dropping the logger hands off whatever is still buffered.
            });
        }
    });

    let dispatch = spec.dispatch().clone();
    assert!(wait_until(3000, || dispatch.active(target).is_some()));

    let graph = dispatch.active(target).unwrap();
    assert!(graph.is_completed());
    assert!(graph.version >= 1);
    assert!(!graph.guards().is_empty());
    assert!(graph.guards().iter().all(|g| g.used));
    assert_eq!(graph.inline_candidates(), &[callee]);

    // A guard failure falls back to the generic path and is attributed.
    let resumption = spec.guard_failed(&graph, GuardId(0), DeoptKind::Call);
    assert!(matches!(resumption, Resumption::GenericPath { site: Some(_) }));
    assert_eq!(dispatch.deopt_count(target), 1);

    spec.shutdown();
    drop(spec);

    // The trace carries one line per event with a monotonic sequence
    // number, a kind, and the target id.
    let text = fs::read_to_string(&trace).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.iter().any(|l| l.contains("specialized")));
    assert!(lines.iter().any(|l| l.contains("deopt")));
    assert!(lines.iter().all(|l| l.contains("target=")));
    let seqs: Vec<u64> = lines
        .iter()
        .map(|l| l.split_whitespace().next().unwrap().parse().unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_install_limit_zero_drains_everything() {
    let config = SpecConfig::builder()
        .no_delay(true)
        .log_capacity(4)
        .limit(Some(0))
        .build();
    let spec = Specializer::new(config).unwrap();
    let target = TargetId(3);

    for run in 0..5 {
        let mut logger = spec.thread_logger(1, target);
        logger.log_arg_type(run, 0, ShapeDescriptor::concrete(2));
        logger.finish_run();
    }

    let stats = spec.worker_stats().unwrap().clone();
    assert!(wait_until(3000, || stats.drained() >= 5));
    assert_eq!(stats.installed(), 0);
    assert!(spec.dispatch().active(target).is_none());
}

#[test]
fn test_disabled_specialization_never_installs() {
    let spec = Specializer::new(SpecConfig::builder().enabled(false).build()).unwrap();
    let target = TargetId(3);

    let mut logger = spec.thread_logger(1, target);
    for _ in 0..32 {
        logger.log_arg_type(0, 0, ShapeDescriptor::concrete(2));
        logger.finish_run();
    }
    drop(logger);

    assert!(spec.worker_stats().is_none());
    assert!(spec.dispatch().active(target).is_none());
}

#[test]
fn test_polymorphic_target_stays_generic() {
    let config = SpecConfig::builder().no_delay(true).log_capacity(4).build();
    let spec = Specializer::new(config).unwrap();
    let target = TargetId(5);

    let mut logger = spec.thread_logger(1, target);
    for type_id in 0..8 {
        logger.log_arg_type(0, 0, ShapeDescriptor::concrete(type_id));
    }
    logger.finish_run();
    drop(logger);

    let stats = spec.worker_stats().unwrap().clone();
    assert!(wait_until(3000, || stats.rejected() >= 1));
    assert!(spec.dispatch().active(target).is_none());
}
