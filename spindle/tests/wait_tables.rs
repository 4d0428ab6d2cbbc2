use spindle::{Direction, Error, Scheduler, Wakeup};

use std::cell::Cell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn pair() -> (Rc<UnixStream>, Rc<UnixStream>) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();

    (Rc::new(a), Rc::new(b))
}

#[spindle::test]
fn test_io_wake_clears_deadline(s: &Scheduler) {
    let (reader, writer) = pair();
    let fd = reader.as_raw_fd();

    s.spawn(move |_| {
        (&*writer).write_all(b"x").unwrap();
    });

    let deadline = s.clock().deadline_after(Duration::from_secs(5));
    let wakeup = s.wait_fd(fd, Direction::Read, Some(deadline)).unwrap();

    assert_eq!(wakeup, Wakeup::Ready);

    let stats = s.stats();
    assert_eq!(stats.timers, 0, "I/O wake must remove the expiry entry");
    assert_eq!(stats.io_waiters, 0);

    s.unregister_fd(fd);
}

#[spindle::test]
fn test_timeout_clears_fd_registration(s: &Scheduler) {
    let (reader, writer) = pair();
    let fd = reader.as_raw_fd();

    let start = Instant::now();
    let deadline = s.clock().deadline_after(Duration::from_millis(30));
    let wakeup = s.wait_fd(fd, Direction::Read, Some(deadline)).unwrap();

    assert_eq!(wakeup, Wakeup::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(30));

    let stats = s.stats();
    assert_eq!(stats.io_waiters, 0);
    assert_eq!(stats.timers, 0);
    assert_eq!(stats.registered_fds, 0, "idle fd is dropped from epoll");

    // Waiting again admits the fd anew and sees data written meanwhile.
    (&*writer).write_all(b"late").unwrap();
    let wakeup = s.wait_fd(fd, Direction::Read, None).unwrap();

    assert_eq!(wakeup, Wakeup::Ready);

    s.unregister_fd(fd);
}

#[spindle::test]
fn test_unregister_wakes_pending_reader(s: &Scheduler) {
    let (reader, _writer) = pair();
    let fd = reader.as_raw_fd();
    let observed = Rc::new(Cell::new(None));

    let seen = observed.clone();
    s.spawn(move |s| {
        seen.set(Some(s.wait_fd(fd, Direction::Read, None).unwrap()));
    });

    // Let the reader park.
    s.yield_now();
    assert_eq!(s.stats().io_waiters, 1);

    s.unregister_fd(fd);

    s.yield_now();
    assert_eq!(observed.get(), Some(Wakeup::Closed));
    assert_eq!(s.stats().registered_fds, 0);
}

#[spindle::test]
fn test_unregister_unknown_fd_is_noop(s: &Scheduler) {
    s.unregister_fd(12345);

    let stats = s.stats();
    assert_eq!(stats.io_waiters, 0);
    assert_eq!(stats.registered_fds, 0);
}

#[spindle::test]
fn test_second_waiter_in_same_direction_conflicts(s: &Scheduler) {
    let (reader, writer) = pair();
    let fd = reader.as_raw_fd();

    let holder = s.spawn(move |s| {
        s.wait_fd(fd, Direction::Read, None).unwrap();
    });

    s.yield_now();

    let err = s.register_wait(fd, Direction::Read, None).unwrap_err();
    assert!(matches!(err, Error::WaiterConflict { holder: h, .. } if h == holder));

    // The failed registration leaves this fiber runnable and untracked.
    assert_eq!(s.stats().io_waiters, 1);
    assert_eq!(
        s.fiber_status(s.current().unwrap()),
        Some(spindle::FiberStatus::Ready)
    );

    (&*writer).write_all(b"x").unwrap();

    while s.fiber_status(holder).is_some() {
        s.yield_now();
    }

    s.unregister_fd(fd);
}

#[spindle::test]
fn test_reader_and_writer_on_same_fd(s: &Scheduler) {
    let (a, b) = pair();
    let fd = a.as_raw_fd();
    let woke = Rc::new(Cell::new(0));

    let count = woke.clone();
    s.spawn(move |s| {
        let wakeup = s.wait_fd(fd, Direction::Read, None).unwrap();
        assert_eq!(wakeup, Wakeup::Ready);
        count.set(count.get() + 1);
    });

    let count = woke.clone();
    s.spawn(move |s| {
        // A fresh socket is writable right away.
        let wakeup = s.wait_fd(fd, Direction::Write, None).unwrap();
        assert_eq!(wakeup, Wakeup::Ready);
        count.set(count.get() + 1);
    });

    s.yield_now();
    (&*b).write_all(b"x").unwrap();

    while woke.get() < 2 {
        s.yield_now();
    }

    assert_eq!(s.stats().io_waiters, 0);
    s.unregister_fd(fd);
}

#[spindle::test]
fn test_finished_fiber_leaves_no_registration(s: &Scheduler) {
    let (reader, writer) = pair();
    let fd = reader.as_raw_fd();

    let deadline = s.clock().deadline_after(Duration::from_secs(60));
    let quitter = s.spawn(move |s| {
        s.register_wait(fd, Direction::Read, Some(deadline)).unwrap();
    });

    while s.fiber_status(quitter).is_some() {
        s.yield_now();
    }

    let stats = s.stats();
    assert_eq!(stats.io_waiters, 0);
    assert_eq!(stats.timers, 0);

    // The fd is free for the next waiter.
    (&*writer).write_all(b"x").unwrap();
    let wakeup = s.wait_fd(fd, Direction::Read, None).unwrap();
    assert_eq!(wakeup, Wakeup::Ready);

    s.unregister_fd(fd);
}

#[spindle::test]
fn test_fiber_woken_before_finishing_is_not_requeued(s: &Scheduler) {
    let (reader, _writer) = pair();
    let fd = reader.as_raw_fd();

    let id = s.spawn(move |s| {
        s.register_wait(fd, Direction::Read, None).unwrap();
        s.unregister_fd(fd);
    });

    s.yield_now();

    assert_eq!(s.fiber_status(id), None);
    assert_eq!(s.stats().ready, 0);
    assert_eq!(s.stats().io_waiters, 0);
}

#[spindle::test]
fn test_unregister_wakes_pending_writer(s: &Scheduler) {
    let (a, _b) = pair();
    let fd = a.as_raw_fd();
    let observed = Rc::new(Cell::new(None));

    // Fill the send buffer so the next wait really parks.
    let chunk = [0u8; 4096];
    while (&*a).write(&chunk).is_ok() {}

    let seen = observed.clone();
    s.spawn(move |s| {
        seen.set(Some(s.wait_fd(fd, Direction::Write, None).unwrap()));
    });

    s.yield_now();
    assert_eq!(s.stats().io_waiters, 1);

    s.unregister_fd(fd);

    s.yield_now();
    assert_eq!(observed.get(), Some(Wakeup::Closed));
    assert_eq!(s.stats().io_waiters, 0);
}
