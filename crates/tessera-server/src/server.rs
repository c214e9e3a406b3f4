//! JSON-lines TCP front end.
//!
//! Each accepted connection gets its own worker thread. A worker reads one
//! request envelope per line and writes one reply envelope per line, in
//! order. All workers share one [`KvService`], and through it one engine.
//!
//! A line longer than the frame cap is answered with a malformed-request
//! reply and skipped without being buffered.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::api::{ErrorBody, Reply, ReplyEnvelope};
use crate::service::KvService;

/// Largest request line accepted by default, newline excluded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

pub struct Server {
    listener: TcpListener,
    service: Arc<KvService>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
    max_frame_bytes: usize,
}

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    /// Stop accepting connections. Workers already running finish their
    /// current connection.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        if let Err(err) = TcpStream::connect(self.wake_addr) {
            tracing::debug!(error = %err, "shutdown wake-up connect failed");
        }
    }
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, service: Arc<KvService>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            service,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    /// Cap on the length of one request line.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        let mut wake_addr = self.local_addr()?;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        Ok(ShutdownHandle { flag: Arc::clone(&self.shutdown), wake_addr })
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Accept connections until shut down.
    pub fn run(&self) -> io::Result<()> {
        tracing::info!(addr = %self.local_addr()?, "accepting connections");
        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };

            let service = Arc::clone(&self.service);
            let active = Arc::clone(&self.active_connections);
            let peer = stream.peer_addr().ok();
            let max_frame_bytes = self.max_frame_bytes;
            active.fetch_add(1, Ordering::Relaxed);
            let spawned = thread::Builder::new().name("tessera-conn".to_string()).spawn(move || {
                if let Err(err) = serve_connection(stream, &service, max_frame_bytes) {
                    tracing::debug!(?peer, error = %err, "connection closed with error");
                }
                active.fetch_sub(1, Ordering::Relaxed);
            });
            if let Err(err) = spawned {
                self.active_connections.fetch_sub(1, Ordering::Relaxed);
                tracing::error!(error = %err, "failed to spawn connection worker");
            }
        }
        tracing::info!("listener stopped");
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// A complete line is in the buffer, newline stripped
    Line,
    /// The line exceeded the cap and was discarded
    TooLong,
    Eof,
}

/// Read one newline-terminated frame into `buf`, holding at most
/// `max + 1` bytes of it. An over-long line is consumed through its newline.
fn read_frame(reader: &mut impl BufRead, max: usize, buf: &mut Vec<u8>) -> io::Result<Frame> {
    buf.clear();
    let read = reader.by_ref().take(max as u64 + 1).read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(Frame::Line);
    }
    if buf.len() <= max {
        // Final line without a newline.
        return Ok(Frame::Line);
    }

    buf.clear();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
    Ok(Frame::TooLong)
}

fn malformed_reply(message: String) -> String {
    let reply = ReplyEnvelope { id: 0, reply: Reply::Error(ErrorBody::malformed(message)) };
    serde_json::to_string(&reply).unwrap_or_else(|_| {
        r#"{"id":0,"reply":{"error":{"kind":"malformed_request","message":"","retryable":false}}}"#.to_string()
    })
}

fn serve_connection(stream: TcpStream, service: &KvService, max_frame_bytes: usize) -> io::Result<()> {
    let peer = stream.peer_addr().ok();
    tracing::debug!(?peer, "connection opened");
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut buf = Vec::new();

    loop {
        let reply = match read_frame(&mut reader, max_frame_bytes, &mut buf)? {
            Frame::Eof => break,
            Frame::TooLong => {
                tracing::debug!(?peer, max_frame_bytes, "request line over frame cap");
                malformed_reply(format!("request line exceeds {} bytes", max_frame_bytes))
            }
            Frame::Line => match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => service.handle_line(line),
                Err(err) => malformed_reply(format!("request line is not UTF-8: {}", err)),
            },
        };
        writer.write_all(reply.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tracing::debug!(?peer, "connection closed");
    Ok(())
}
