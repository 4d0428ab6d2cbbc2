use super::connection::Connection;
use super::wait_ready;
use crate::error::{Error, Result};
use crate::fiber::Wakeup;
use crate::reactor::io::Direction;
use crate::reactor::poller::platform::{
    domain_of, sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};
use crate::runtime::Scheduler;

use log::{debug, error, info};

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// A TCP listener driven by a [`Scheduler`].
///
/// `Listener` accepts incoming TCP connections without blocking the
/// thread: when no connection is pending, the accepting fiber suspends
/// until the listening socket becomes readable.
pub struct Listener {
    /// File descriptor of the listening socket.
    fd: RawFd,

    scheduler: Scheduler,
}

impl Listener {
    /// Listens on `port` on every IPv4 interface.
    pub fn listen_tcp(scheduler: &Scheduler, port: u16) -> Result<Self> {
        Self::bind_addr(scheduler, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Binds a listener to the given address.
    ///
    /// The address must be a valid socket address string, such as
    /// `"127.0.0.1:8080"` or `"[::1]:8080"`.
    pub fn bind(scheduler: &Scheduler, address: &str) -> Result<Self> {
        let addr = address
            .parse::<SocketAddr>()
            .map_err(|_| Error::InvalidAddress(address.to_owned()))?;

        Self::bind_addr(scheduler, addr)
    }

    /// Binds a listener to `addr`.
    ///
    /// This function:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening,
    /// - registers the socket with the scheduler.
    pub fn bind_addr(scheduler: &Scheduler, addr: SocketAddr) -> Result<Self> {
        let domain = domain_of(&addr);
        let fd = sys_socket(domain)?;

        let listener = Self {
            fd,
            scheduler: scheduler.clone(),
        };

        sys_set_reuseaddr(fd)?;
        sys_ipv6_is_necessary(fd, domain)?;
        sys_bind(fd, &addr)?;
        sys_listen(fd)?;
        scheduler.register_fd(fd)?;

        info!("listening on {}", listener.local_addr().unwrap_or(addr));

        Ok(listener)
    }

    /// Accepts an incoming connection, suspending the calling fiber
    /// until one is pending.
    pub fn accept(&self) -> Result<Connection> {
        self.accept_timeout(None)
    }

    /// Like [`accept`](Self::accept), giving up with
    /// [`Error::TimedOut`] once `timeout` has elapsed.
    ///
    /// The accepted socket is non-blocking, has Nagle's algorithm
    /// disabled and is registered with the scheduler.
    pub fn accept_timeout(&self, timeout: Option<Duration>) -> Result<Connection> {
        let mut deadline = None;

        loop {
            match sys_accept(self.fd) {
                Ok((fd, peer)) => {
                    debug!("accepted fd {fd} from {peer}");
                    return Connection::admit(&self.scheduler, fd);
                }

                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue;
                }

                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
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
                        Wakeup::Closed => return Err(Error::Closed),
                    }
                }

                Err(e) => {
                    error!("accept on fd {} failed: {e}", self.fd);
                    return Err(e.into());
                }
            }
        }
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.fd)?)
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Listener {
    /// Unregisters and closes the listening socket.
    fn drop(&mut self) {
        self.scheduler.unregister_fd(self.fd);
        sys_close(self.fd);

        debug!("listener fd {} closed", self.fd);
    }
}
