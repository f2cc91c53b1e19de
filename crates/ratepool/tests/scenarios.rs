//! End-to-end behaviour of a running pool under real threads and timers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ratepool::{Pool, PoolConfig, PoolError, PoolState};

#[test]
fn sequential_calls_are_spaced_by_the_tick_interval() {
    let pool: Pool<usize, usize> = Pool::with_rate(1, 1000, |n| n).unwrap();

    let started = Instant::now();
    let results: Vec<usize> = (0..10).map(|i| pool.execute(i).unwrap()).collect();
    let elapsed = started.elapsed();

    assert_eq!(results, (0..10).collect::<Vec<_>>());
    // Ten tokens need ten ticks of ~1ms each.
    assert!(elapsed >= Duration::from_millis(5), "elapsed = {elapsed:?}");
    assert_eq!(pool.stats().admitted, 10);
}

#[test]
fn thousand_concurrent_callers_then_close() {
    let pool: Pool<usize, usize> = Pool::with_rate(100, 1000, |n| {
        thread::sleep(Duration::from_millis(1));
        n
    })
    .unwrap();

    let errors = AtomicUsize::new(0);
    thread::scope(|s| {
        for i in 0..1000 {
            let pool = &pool;
            let errors = &errors;
            s.spawn(move || {
                if pool.execute(i).is_err() {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    let closing = Instant::now();
    pool.close();
    assert!(closing.elapsed() < Duration::from_millis(100));
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(pool.stats().admitted, 1000);
}

#[test]
fn closed_pool_rejects_without_blocking() {
    let pool: Pool<(), ()> = Pool::new(4, |_| ()).unwrap();
    pool.close();

    let started = Instant::now();
    for _ in 0..100 {
        assert!(matches!(pool.execute(()), Err(PoolError::Shutdown)));
        assert!(matches!(
            pool.execute_with_deadline((), Duration::from_secs(10)),
            Err(PoolError::Shutdown)
        ));
    }
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn deadline_expires_while_single_slot_is_held() {
    let pool: Pool<Duration, ()> = Pool::with_rate(1, 1000, thread::sleep).unwrap();

    thread::scope(|s| {
        let holder = s.spawn(|| pool.execute(Duration::from_millis(250)));
        while pool.in_flight() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let result = pool.execute_with_deadline(Duration::ZERO, Duration::from_millis(30));
        assert!(matches!(result, Err(PoolError::Timeout { .. })));

        assert!(holder.join().unwrap().is_ok());
    });

    // Once the holder finishes, capacity returns and new calls succeed.
    assert!(
        pool.execute_with_deadline(Duration::ZERO, Duration::from_secs(1))
            .is_ok()
    );
}

#[test]
fn occupancy_never_exceeds_capacity() {
    const CAPACITY: usize = 5;

    let pool: Pool<(), ()> = Pool::with_rate(CAPACITY, 2000, |_| {
        thread::sleep(Duration::from_micros(300));
    })
    .unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let sampler = s.spawn(|| {
            let mut samples = 0usize;
            while !done.load(Ordering::SeqCst) {
                let stats = pool.stats();
                assert!(stats.resident <= CAPACITY);
                assert!(stats.resident + stats.in_flight <= CAPACITY);
                samples += 1;
            }
            samples
        });

        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..20 {
                        pool.execute(()).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        done.store(true, Ordering::SeqCst);
        assert!(sampler.join().unwrap() > 0);
    });
}

#[test]
fn minting_rate_tracks_configuration() {
    // Large capacity so the producer is never held back by a full store.
    let pool: Pool<(), ()> = Pool::with_rate(10_000, 200, |_| ()).unwrap();

    let started = Instant::now();
    thread::sleep(Duration::from_millis(500));
    let minted = pool.stats().minted as f64;
    let expected = started.elapsed().as_secs_f64() * 200.0;

    assert!(
        minted >= expected * 0.6 && minted <= expected * 1.1,
        "minted {minted}, expected about {expected}"
    );
}

#[test]
fn rate_change_applies_to_running_pool() {
    let pool: Pool<(), ()> = Pool::with_rate(10_000, 10, |_| ()).unwrap();
    pool.set_rate(1000);

    thread::sleep(Duration::from_millis(300));
    // At the old rate this would be about 3 tokens.
    assert!(pool.occupancy() > 50, "occupancy = {}", pool.occupancy());
}

#[test]
fn waiters_observe_close_instead_of_hanging() {
    let pool: Pool<(), ()> = Pool::with_rate(1, 1, |_| ()).unwrap();
    let released = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                if pool.execute(()).is_err_and(|e| e.is_shutdown()) {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        thread::sleep(Duration::from_millis(50));
        pool.close();
    });

    // The first tick is a second away, so no caller could have been admitted.
    assert_eq!(released.load(Ordering::SeqCst), 8);
}

#[test]
fn pool_from_config_can_be_shared_across_threads() {
    let config = PoolConfig::new(2).with_qps(500);
    let pool = Arc::new(Pool::from_config(&config, |s: String| s.to_uppercase()).unwrap());

    let handles: Vec<_> = ["token", "bucket"]
        .into_iter()
        .map(|word| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.execute(word.to_string()).unwrap())
        })
        .collect();

    let mut words: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    words.sort();
    assert_eq!(words, vec!["BUCKET", "TOKEN"]);
}
