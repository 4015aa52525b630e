use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use xian_render_core::engine::context::{ContextPool, HeadlessPlatform, ScopedContext};
use xian_render_core::engine::RenderError;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

fn pool(platform: &Arc<HeadlessPlatform>) -> ContextPool {
    ContextPool::create(platform.clone(), 2, Duration::from_secs(30)).expect("headless pool")
}

#[test]
fn no_context_is_ever_current_on_two_threads() {
    let platform = HeadlessPlatform::new();
    let pool = Arc::new(pool(&platform));
    let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..pool.len()).map(|_| AtomicBool::new(false)).collect());
    let overlaps = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let (pool, in_use, overlaps, barrier) =
                (pool.clone(), in_use.clone(), overlaps.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let scope = ScopedContext::acquire(&pool, None).expect("worker context");
                    assert_ne!(scope.slot(), 0);
                    if in_use[scope.slot()].swap(true, Ordering::AcqRel) {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    thread::yield_now();
                    in_use[scope.slot()].store(false, Ordering::Release);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::Relaxed), 0);
    assert_eq!(platform.violations(), 0);
    for slot in 0..pool.len() {
        assert_eq!(pool.refcount(slot), 0, "slot {slot} still held");
        assert!(!pool.is_claimed(slot));
    }
}

#[test]
fn nested_scopes_restore_the_outer_context() {
    let platform = HeadlessPlatform::new();
    let pool = pool(&platform);

    let outer = ScopedContext::main(&pool).unwrap();
    assert_eq!(pool.current_slot(), Some(0));
    {
        let inner = ScopedContext::acquire(&pool, Some(0)).unwrap();
        assert_eq!(inner.slot(), 0);
        assert_eq!(pool.refcount(0), 2);
    }
    assert_eq!(pool.refcount(0), 1);
    assert_eq!(platform.current_on_this_thread(), Some(outer.slot()));
    drop(outer);

    assert_eq!(pool.refcount(0), 0);
    assert_eq!(pool.current_slot(), None);
    assert_eq!(platform.current_on_this_thread(), None);
}

#[test]
fn releasing_an_unheld_context_is_an_error() {
    let platform = HeadlessPlatform::new();
    let pool = pool(&platform);
    assert!(matches!(pool.release(1), Err(RenderError::ContextNotHeld { slot: 1 })));
}

#[test]
fn a_failing_platform_aborts_pool_creation() {
    let platform = HeadlessPlatform::failing_at(1);
    let result = ContextPool::create(platform.clone(), 2, Duration::from_secs(1));
    assert!(result.is_err());
    assert_eq!(platform.live_contexts(), 0);
}
