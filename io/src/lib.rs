pub mod tcp;

pub use tcp::*;

use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

/// Overall budget for establishing one TCP connection, retries included.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// What a connection worker reports back to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw bytes straight off the socket. Framing happens above this layer
    /// because vendor dialects disagree about it.
    Segment(Vec<u8>),
    /// Orderly end of stream.
    Shutdown(Source),
    Error(io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Read,
    Write,
}

#[derive(Debug, thiserror::Error)]
#[error("transport write channel closed")]
pub struct ChannelClosed;

/// Dials with bounded exponential backoff until `timeout` is spent. Budget
/// exhaustion is reported as `TimedOut` wrapping the last connect error.
pub fn connect_retry<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
    let start = Instant::now();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match TcpStream::connect(&addr) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                if start.elapsed() + backoff >= timeout {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, error));
                }
                log::debug!("connect failed ({error}), retrying in {backoff:?}");
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

pub fn configure_keepalive(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))
}

/// Joins the wrapped thread when dropped, so worker shutdown is tied to the
/// lifetime of whoever spawned it.
pub struct JoinOnDrop<T>(Option<thread::JoinHandle<T>>);

impl<T> JoinOnDrop<T> {
    pub fn new(handle: thread::JoinHandle<T>) -> Self {
        Self(Some(handle))
    }
}

impl<T> Drop for JoinOnDrop<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            let _ = handle.join();
        }
    }
}
