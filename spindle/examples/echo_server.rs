//! Example: TCP echo server on fibers.
//!
//! One fiber accepts connections, and each connection gets its own fiber
//! that echoes everything back. Set `RUST_LOG=debug` to watch the
//! scheduler park and wake them.

use clap::Parser;
use spindle::net::{Connection, Listener};
use spindle::{FiberBuilder, Scheduler, SchedulerBuilder};

use std::process;
use std::time::Duration;

const ACCEPT_BACKOFF_MS: u64 = 100;

/// Echo server driven by a single-threaded fiber scheduler.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Port to listen on, on every interface.
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Stack size of connection fibers, in KiB.
    #[arg(long, default_value_t = 256)]
    stack_kib: usize,

    /// Close connections idle for this many seconds (0 = never).
    #[arg(long, default_value_t = 0)]
    idle_timeout: u64,
}

fn main() {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let scheduler = match SchedulerBuilder::new()
        .stack_size(cli.stack_kib * 1024)
        .build()
    {
        Ok(scheduler) => scheduler,
        Err(e) => {
            log::error!("cannot start scheduler: {e}");
            process::exit(1);
        }
    };

    let listener = match Listener::listen_tcp(&scheduler, cli.port) {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("cannot listen on port {}: {e}", cli.port);
            process::exit(1);
        }
    };

    let idle = (cli.idle_timeout > 0).then(|| Duration::from_secs(cli.idle_timeout));

    FiberBuilder::new()
        .name("acceptor")
        .spawn(&scheduler, move |s| accept_loop(s, listener, idle));

    scheduler.dispatch();
}

fn accept_loop(s: &Scheduler, listener: Listener, idle: Option<Duration>) {
    loop {
        let conn = match listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                // Usually fd exhaustion: let clients run so they can close.
                log::warn!("accept failed: {e}, backing off");
                s.sleep_ms(ACCEPT_BACKOFF_MS);
                continue;
            }
        };

        let name = match conn.peer_addr() {
            Ok(addr) => format!("client {addr}"),
            Err(_) => "client".to_owned(),
        };

        FiberBuilder::new()
            .name(name)
            .spawn(s, move |_| handle_client(conn, idle));
    }
}

// Echo handler: reads data and writes it back to the client
fn handle_client(conn: Connection, idle: Option<Duration>) {
    let mut buf = [0u8; 1024];

    loop {
        let n = match conn.read_timeout(&mut buf, idle) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("closing connection: {e}");
                break;
            }
        };

        if conn.write(&buf[..n]).is_err() {
            break;
        }
    }
}
