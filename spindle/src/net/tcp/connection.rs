use super::wait_ready;
use crate::error::{Error, Result};
use crate::fiber::Wakeup;
use crate::reactor::io::Direction;
use crate::reactor::poller::platform::{
    domain_of, sys_close, sys_connect, sys_peername, sys_read, sys_send, sys_set_nodelay,
    sys_shutdown, sys_socket, sys_sockname, sys_take_socket_error,
};
use crate::runtime::Scheduler;

use log::{debug, info, warn};

use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// A connected TCP stream driven by a [`Scheduler`].
///
/// Reads and writes loop on the non-blocking syscall and suspend the
/// calling fiber whenever it would block. A connection is meant to be
/// driven by a single fiber.
///
/// Dropping a `Connection` unregisters its fd from the scheduler,
/// waking any fiber still parked on it, and closes it.
pub struct Connection {
    fd: RawFd,
    scheduler: Scheduler,
}

impl Connection {
    /// Takes ownership of an accepted socket.
    pub(crate) fn admit(scheduler: &Scheduler, fd: RawFd) -> Result<Self> {
        let connection = Self {
            fd,
            scheduler: scheduler.clone(),
        };

        if let Err(e) = sys_set_nodelay(fd) {
            warn!("TCP_NODELAY on fd {fd} failed: {e}");
        }

        scheduler.register_fd(fd)?;

        Ok(connection)
    }

    /// Connects to `ip:port`, suspending the calling fiber while the
    /// handshake is in progress.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let conn = Connection::connect_tcp(s, "127.0.0.1", 9000)?;
    /// conn.write(b"ping")?;
    /// ```
    pub fn connect_tcp(scheduler: &Scheduler, ip: &str, port: u16) -> Result<Self> {
        let ip = ip
            .parse::<IpAddr>()
            .map_err(|_| Error::InvalidAddress(ip.to_owned()))?;

        Self::connect(scheduler, SocketAddr::new(ip, port))
    }

    /// Connects to `addr`.
    pub fn connect(scheduler: &Scheduler, addr: SocketAddr) -> Result<Self> {
        Self::connect_timeout(scheduler, addr, None)
    }

    /// Connects to `addr`, giving up with [`Error::TimedOut`] once
    /// `timeout` has elapsed.
    pub fn connect_timeout(
        scheduler: &Scheduler,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let fd = sys_socket(domain_of(&addr))?;

        let connection = Self {
            fd,
            scheduler: scheduler.clone(),
        };

        match sys_connect(fd, &addr) {
            Ok(()) => {}

            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                scheduler.register_fd(fd)?;

                let mut deadline = None;
                let wakeup = wait_ready(scheduler, fd, Direction::Write, timeout, &mut deadline)?;

                match wakeup {
                    Wakeup::Ready => {}
                    Wakeup::TimedOut => return Err(Error::TimedOut),
                    Wakeup::Closed => return Err(Error::Closed),
                }

                if let Some(e) = sys_take_socket_error(fd)? {
                    debug!("connect to {addr} failed: {e}");
                    return Err(e.into());
                }
            }

            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                return Err(e.into());
            }
        }

        if let Err(e) = sys_set_nodelay(fd) {
            warn!("TCP_NODELAY on fd {fd} failed: {e}");
        }

        scheduler.register_fd(fd)?;

        info!("fd {fd} connected to {addr}");

        Ok(connection)
    }

    /// Reads into `buffer`, suspending until some data is available.
    ///
    /// Returns as soon as any bytes arrive; it does not try to fill the
    /// buffer. `Ok(0)` means the peer closed the stream or the fd was
    /// unregistered while waiting.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        self.read_timeout(buffer, None)
    }

    /// Like [`read`](Self::read), failing with [`Error::TimedOut`] if
    /// nothing arrives before `timeout`. A zero timeout waits forever.
    pub fn read_timeout(&self, buffer: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let mut deadline = None;

        loop {
            let n = sys_read(self.fd, buffer);

            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();

            match err.kind() {
                io::ErrorKind::Interrupted => continue,

                io::ErrorKind::WouldBlock => {
                    let wakeup = wait_ready(
                        &self.scheduler,
                        self.fd,
                        Direction::Read,
                        timeout,
                        &mut deadline,
                    )?;

                    match wakeup {
                        Wakeup::Ready => continue,
                        Wakeup::TimedOut => return Err(Error::TimedOut),
                        Wakeup::Closed => return Ok(0),
                    }
                }

                _ => return Err(err.into()),
            }
        }
    }

    /// Writes all of `buffer`, suspending whenever the socket's send
    /// buffer is full.
    pub fn write(&self, buffer: &[u8]) -> Result<usize> {
        self.write_timeout(buffer, None)
    }

    /// Like [`write`](Self::write), failing with [`Error::TimedOut`] if
    /// the socket stays full past `timeout`. A zero timeout waits
    /// forever.
    ///
    /// The timeout covers the whole buffer. A timed-out write may already
    /// have sent part of it, and how much is not reported, so the stream
    /// should be closed afterwards.
    pub fn write_timeout(&self, buffer: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let mut deadline = None;
        let mut written = 0;

        while written < buffer.len() {
            let n = sys_send(self.fd, &buffer[written..]);

            if n > 0 {
                written += n as usize;
                continue;
            }

            if n == 0 {
                break;
            }

            let err = io::Error::last_os_error();

            match err.kind() {
                io::ErrorKind::Interrupted => continue,

                io::ErrorKind::WouldBlock => {
                    let wakeup = wait_ready(
                        &self.scheduler,
                        self.fd,
                        Direction::Write,
                        timeout,
                        &mut deadline,
                    )?;

                    match wakeup {
                        Wakeup::Ready => continue,
                        Wakeup::TimedOut => return Err(Error::TimedOut),
                        Wakeup::Closed => return Err(Error::Closed),
                    }
                }

                _ => return Err(err.into()),
            }
        }

        Ok(written)
    }

    /// Shuts down the read, write, or both halves of this connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        Ok(sys_shutdown(self.fd, how)?)
    }

    /// Returns the address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(sys_peername(self.fd)?)
    }

    /// Returns the local address of this connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.fd)?)
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Connection {
    /// Unregisters the fd from the scheduler, then closes it.
    fn drop(&mut self) {
        self.scheduler.unregister_fd(self.fd);
        sys_close(self.fd);

        debug!("connection fd {} closed", self.fd);
    }
}
