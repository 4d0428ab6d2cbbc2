use spindle::net::{Connection, Listener};
use spindle::{Error, FiberStatus, Scheduler};

use std::cell::{Cell, RefCell};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn local_listener(s: &Scheduler) -> (Listener, u16) {
    let listener = Listener::bind(s, "127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    (listener, port)
}

#[spindle::test]
fn test_tcp_round_trip(s: &Scheduler) {
    let (listener, port) = local_listener(s);

    s.spawn(move |s| {
        let conn = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();
        assert_eq!(conn.write(b"hello").unwrap(), 5);

        let mut buffer = [0u8; 5];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = conn.read(&mut buffer[filled..]).unwrap();
            assert!(n > 0, "peer closed early");
            filled += n;
        }
        assert_eq!(&buffer, b"world");
    });

    let conn = listener.accept().unwrap();
    assert_eq!(
        conn.peer_addr().unwrap().ip(),
        conn.local_addr().unwrap().ip()
    );

    let mut buffer = [0u8; 5];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = conn.read(&mut buffer[filled..]).unwrap();
        assert!(n > 0, "peer closed early");
        filled += n;
    }
    assert_eq!(&buffer, b"hello");

    assert_eq!(conn.write(b"world").unwrap(), 5);
}

#[spindle::test]
fn test_tcp_multiple_messages(s: &Scheduler) {
    let (listener, port) = local_listener(s);

    s.spawn(move |s| {
        let conn = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();

        for _ in 0..3 {
            conn.write(b"ping").unwrap();

            let mut buffer = [0u8; 4];
            let mut filled = 0;
            while filled < 4 {
                filled += conn.read(&mut buffer[filled..]).unwrap();
            }
            assert_eq!(&buffer, b"pong");
        }
    });

    let conn = listener.accept().unwrap();

    for _ in 0..3 {
        let mut buffer = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            filled += conn.read(&mut buffer[filled..]).unwrap();
        }
        assert_eq!(&buffer, b"ping");

        conn.write(b"pong").unwrap();
    }
}

#[spindle::test]
fn test_large_write_suspends_until_drained(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    s.spawn(move |s| {
        let conn = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();
        assert_eq!(conn.write(&payload).unwrap(), payload.len());
        conn.shutdown(Shutdown::Write).unwrap();
    });

    let conn = listener.accept().unwrap();

    let mut received = Vec::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = conn.read(&mut buffer).unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buffer[..n]);
    }

    assert_eq!(received.len(), expected.len());
    assert!(received == expected);
}

#[spindle::test]
fn test_read_timeout_clears_registration(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let client: Rc<RefCell<Option<Connection>>> = Rc::new(RefCell::new(None));

    let slot = client.clone();
    s.spawn(move |s| {
        let conn = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();
        *slot.borrow_mut() = Some(conn);
    });

    let conn = listener.accept().unwrap();

    let start = Instant::now();
    let mut buffer = [0u8; 16];
    let err = conn
        .read_timeout(&mut buffer, Some(Duration::from_millis(50)))
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(start.elapsed() >= Duration::from_millis(50));

    let stats = s.stats();
    assert_eq!(stats.io_waiters, 0);
    assert_eq!(stats.timers, 0);

    // Later readiness on the same fd must not resurrect the expired wait.
    s.sleep_ms(10);
    {
        let slot = client.borrow();
        let peer = slot.as_ref().unwrap();
        peer.write(b"late").unwrap();
    }

    let n = conn
        .read_timeout(&mut buffer, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(&buffer[..n], b"late");

    client.borrow_mut().take();
    assert_eq!(conn.read(&mut buffer).unwrap(), 0);
}

#[spindle::test]
fn test_accept_timeout(s: &Scheduler) {
    let (listener, _) = local_listener(s);

    let result = listener.accept_timeout(Some(Duration::from_millis(20)));

    assert!(matches!(result, Err(Error::TimedOut)));
    assert_eq!(s.stats().timers, 0);
}

#[spindle::test]
fn test_unregister_wakes_connection_reader(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let connected = Rc::new(Cell::new(false));

    let flag = connected.clone();
    s.spawn(move |s| {
        let _conn = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();
        flag.set(true);
        s.sleep_ms(100);
    });

    let conn = Rc::new(listener.accept().unwrap());
    while !connected.get() {
        s.yield_now();
    }

    let result = Rc::new(RefCell::new(None));

    let reader = conn.clone();
    let out = result.clone();
    s.spawn(move |_| {
        let mut buffer = [0u8; 8];
        *out.borrow_mut() = Some(reader.read(&mut buffer).unwrap());
    });

    s.yield_now();
    assert_eq!(s.stats().io_waiters, 1);

    s.unregister_fd(conn.as_raw_fd());
    s.yield_now();

    assert_eq!(*result.borrow(), Some(0));
}

#[spindle::test]
fn test_connect_refused(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    drop(listener);

    let result = Connection::connect_tcp(s, "127.0.0.1", port);

    assert!(matches!(result, Err(Error::Io(_))));
}

#[spindle::test]
fn test_invalid_address(s: &Scheduler) {
    assert!(matches!(
        Listener::bind(s, "not an address"),
        Err(Error::InvalidAddress(_))
    ));
    assert!(matches!(
        Connection::connect_tcp(s, "localhost?", 80),
        Err(Error::InvalidAddress(_))
    ));
}

#[spindle::test]
fn test_write_timeout_when_peer_does_not_drain(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let outcome = Rc::new(RefCell::new(None));

    let out = outcome.clone();
    s.spawn(move |s| {
        let conn = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();
        let payload = vec![7u8; 64 * 1024 * 1024];

        let start = Instant::now();
        let result = conn.write_timeout(&payload, Some(Duration::from_millis(50)));
        *out.borrow_mut() = Some((result, start.elapsed()));
    });

    // Accept but never read.
    let _peer = listener.accept().unwrap();

    while outcome.borrow().is_none() {
        s.sleep_ms(5);
    }

    let (result, elapsed) = outcome.borrow_mut().take().unwrap();
    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(elapsed >= Duration::from_millis(50));

    let stats = s.stats();
    assert_eq!(stats.io_waiters, 0);
    assert_eq!(stats.timers, 0);
}

#[spindle::test]
fn test_connect_timeout_to_live_listener(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    s.spawn(move |_| {
        let _conn = listener.accept().unwrap();
    });

    let conn = Connection::connect_timeout(s, addr, Some(Duration::from_secs(5))).unwrap();

    assert_eq!(conn.peer_addr().unwrap(), addr);
    assert_eq!(s.stats().timers, 0, "a completed connect drops its deadline");
}

#[spindle::test]
fn test_unregister_wakes_pending_acceptor(s: &Scheduler) {
    let (listener, _) = local_listener(s);
    let listener = Rc::new(listener);
    let result = Rc::new(RefCell::new(None));

    let acceptor = listener.clone();
    let out = result.clone();
    s.spawn(move |_| {
        *out.borrow_mut() = Some(acceptor.accept().map(|_| ()));
    });

    s.yield_now();
    assert_eq!(s.stats().io_waiters, 1);

    s.unregister_fd(listener.as_raw_fd());
    s.yield_now();

    assert!(matches!(result.borrow_mut().take(), Some(Err(Error::Closed))));
}

#[spindle::test]
fn test_unregister_wakes_connection_writer(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let result = Rc::new(RefCell::new(None));
    let writer: Rc<RefCell<Option<Rc<Connection>>>> = Rc::new(RefCell::new(None));

    let out = result.clone();
    let slot = writer.clone();
    s.spawn(move |s| {
        let conn = Rc::new(Connection::connect_tcp(s, "127.0.0.1", port).unwrap());
        *slot.borrow_mut() = Some(conn.clone());

        let payload = vec![1u8; 64 * 1024 * 1024];
        *out.borrow_mut() = Some(conn.write(&payload));
    });

    let _peer = listener.accept().unwrap();

    // Wait for the writer to connect, fill the socket and park.
    while writer.borrow().is_none() || s.stats().io_waiters == 0 {
        s.sleep_ms(1);
    }

    let fd = writer.borrow().as_ref().unwrap().as_raw_fd();
    s.unregister_fd(fd);

    while result.borrow().is_none() {
        s.yield_now();
    }

    assert!(matches!(result.borrow_mut().take(), Some(Err(Error::Closed))));
}

#[spindle::test]
fn test_readiness_after_deadline_reports_timeout(s: &Scheduler) {
    let (listener, port) = local_listener(s);
    let client = Connection::connect_tcp(s, "127.0.0.1", port).unwrap();
    let server = listener.accept().unwrap();
    let outcome = Rc::new(RefCell::new(None));

    let out = outcome.clone();
    let reader = s.spawn(move |_| {
        let mut buffer = [0u8; 8];
        let result = server.read_timeout(&mut buffer, Some(Duration::from_millis(30)));
        *out.borrow_mut() = Some(result);
    });

    s.yield_now();
    client.write(b"late").unwrap();

    while s.fiber_status(reader) != Some(FiberStatus::Ready) {
        s.yield_now();
    }

    // Woken by readiness, but only resumed once the deadline is gone.
    std::thread::sleep(Duration::from_millis(50));
    s.yield_now();

    assert!(matches!(outcome.borrow_mut().take(), Some(Err(Error::TimedOut))));
    assert_eq!(s.stats().timers, 0);
}
