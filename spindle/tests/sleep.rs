use spindle::Scheduler;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[spindle::test]
fn test_sleep_basic(s: &Scheduler) {
    let start = Instant::now();
    s.sleep(Duration::from_millis(50));
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(50),
        "Sleep should wait at least the specified duration"
    );
    assert_eq!(s.stats().timers, 0, "Expiry entry should be gone on resume");
}

#[spindle::test]
fn test_sleep_zero_duration(s: &Scheduler) {
    let start = Instant::now();
    s.sleep_ms(0);
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_millis(50),
        "Zero duration sleep should be fast"
    );
}

#[test]
fn test_sleepers_wake_in_deadline_order() {
    let scheduler = Scheduler::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    for (name, ms) in [("slow", 60), ("fast", 10), ("medium", 30)] {
        let log = log.clone();
        scheduler.spawn(move |s| {
            s.sleep_ms(ms);
            log.borrow_mut().push(name);
        });
    }

    scheduler.run();

    assert_eq!(*log.borrow(), ["fast", "medium", "slow"]);
}

#[test]
fn test_shared_deadline_wakes_everyone() {
    let scheduler = Scheduler::new();
    let woken = Rc::new(RefCell::new(0));

    for _ in 0..20 {
        let woken = woken.clone();
        scheduler.spawn(move |s| {
            s.sleep_ms(5);
            *woken.borrow_mut() += 1;
        });
    }

    scheduler.run();

    assert_eq!(*woken.borrow(), 20);
    assert_eq!(scheduler.stats().timers, 0);
}

#[test]
fn test_sleeping_fiber_is_not_ready() {
    let scheduler = Scheduler::new();

    let id = scheduler.spawn(|s| s.sleep_ms(20));

    scheduler.run_once();

    let stats = scheduler.stats();
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.timers, 1);
    assert_eq!(
        scheduler.fiber_status(id),
        Some(spindle::FiberStatus::Waiting)
    );

    scheduler.run();
    assert_eq!(scheduler.fiber_status(id), None);
}

#[test]
fn test_sleep_does_not_block_other_fibers() {
    let scheduler = Scheduler::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let sleeper = log.clone();
    scheduler.spawn(move |s| {
        s.sleep_ms(30);
        sleeper.borrow_mut().push("sleeper");
    });

    let worker = log.clone();
    scheduler.spawn(move |s| {
        for _ in 0..3 {
            worker.borrow_mut().push("worker");
            s.yield_now();
        }
    });

    scheduler.run();

    assert_eq!(*log.borrow(), ["worker", "worker", "worker", "sleeper"]);
}
