//! Line-framed TCP transport: turns a raw byte stream into a stream of
//! newline-terminated text messages in both directions.
//!
//! Each connection runs two background tasks: a reader that accumulates
//! bytes and emits one event per complete line, and a writer that drains a
//! send queue. Lifecycle events (received lines, the single close
//! notification) are delivered over an unbounded channel to whoever owns
//! the connection, normally a game session task.

use log::debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Shut down on purpose by this side.
    Graceful,
    /// The remote went away or an I/O error killed the stream. A zero-byte
    /// read is reported here too; the framing layer does not distinguish a
    /// clean remote close from a genuine drop.
    Dropped(String),
}

/// Events emitted by a connection's reader task, in order.
///
/// Exactly one `Closed` event is emitted per connection, always last.
#[derive(Debug)]
pub enum ConnectionEvent {
    Line(String),
    Closed(CloseReason),
}

enum WriterCmd {
    Line(String),
    Shutdown,
}

/// Counts live connections across the server; cloned into each connection
/// and released by the reader task when the close event fires.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    count: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to one line-framed TCP connection. Cheap to clone; all clones
/// refer to the same underlying stream and tasks.
#[derive(Clone)]
pub struct Connection {
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<WriterCmd>,
    connected: Arc<AtomicBool>,
    graceful: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    /// Wraps an accepted stream and starts its reader and writer tasks.
    /// Returns the handle plus the receiver for this connection's events.
    pub fn from_stream(
        stream: TcpStream,
        tracker: ConnectionTracker,
    ) -> (Connection, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let addr = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (read_half, write_half) = stream.into_split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connected = Arc::new(AtomicBool::new(true));
        let graceful = Arc::new(AtomicBool::new(false));

        tracker.acquire();
        tokio::spawn(run_reader(
            read_half,
            event_tx,
            shutdown_rx.clone(),
            Arc::clone(&connected),
            Arc::clone(&graceful),
            tracker,
            addr,
        ));
        tokio::spawn(run_writer(write_half, out_rx, shutdown_tx.clone(), shutdown_rx));

        let connection = Connection {
            addr,
            outgoing: out_tx,
            connected,
            graceful,
            shutdown: shutdown_tx,
        };
        (connection, event_rx)
    }

    /// Dials a remote host and wraps the resulting stream. Connecting is an
    /// awaited constructor here, so a connection handle can never be asked
    /// to connect twice.
    pub async fn connect(
        addr: SocketAddr,
    ) -> std::io::Result<(Connection, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, ConnectionTracker::new()))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues one text message; a newline terminator is appended on the
    /// wire. Sends after the connection has closed are dropped silently.
    pub fn send(&self, text: &str) {
        if !self.is_connected() {
            return;
        }
        let _ = self.outgoing.send(WriterCmd::Line(text.to_string()));
    }

    /// Begins a graceful shutdown: pending sends are flushed, the write
    /// side is shut down, and the reader reports `Closed(Graceful)`.
    pub fn disconnect(&self) {
        self.graceful.store(true, Ordering::SeqCst);
        // The writer drains every line queued ahead of the shutdown command
        // and signals the watch itself once the write half is down. Only
        // force the watch when the writer task is already gone.
        if self.outgoing.send(WriterCmd::Shutdown).is_err() {
            let _ = self.shutdown.send(true);
        }
    }

    /// Immediately terminates the connection. Idempotent; the reader task
    /// reports `Closed(Dropped)` exactly once.
    pub fn abort(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_reader(
    mut read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    graceful: Arc<AtomicBool>,
    tracker: ConnectionTracker,
    addr: SocketAddr,
) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    let reason = 'read: loop {
        tokio::select! {
            result = read_half.read(&mut chunk) => match result {
                Ok(0) => {
                    if graceful.load(Ordering::SeqCst) {
                        break CloseReason::Graceful;
                    }
                    break CloseReason::Dropped("closed by remote".to_string());
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    for line in split_lines(&mut buffer) {
                        if events.send(ConnectionEvent::Line(line)).is_err() {
                            // Owner is gone; nothing left to deliver to.
                            break 'read CloseReason::Dropped("receiver dropped".to_string());
                        }
                    }
                }
                Err(e) => break CloseReason::Dropped(e.to_string()),
            },
            _ = shutdown.changed() => {
                if graceful.load(Ordering::SeqCst) {
                    break CloseReason::Graceful;
                }
                break CloseReason::Dropped("aborted".to_string());
            }
        }
    };

    debug!("Connection {} closed: {:?}", addr, reason);
    connected.store(false, Ordering::SeqCst);
    tracker.release();
    let _ = events.send(ConnectionEvent::Closed(reason));
}

async fn run_writer(
    mut write_half: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<WriterCmd>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            cmd = outgoing.recv() => match cmd {
                Some(WriterCmd::Line(text)) => {
                    let mut bytes = text.into_bytes();
                    bytes.push(b'\n');
                    if write_half.write_all(&bytes).await.is_err() {
                        // Terminal send failure aborts the whole connection.
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
                Some(WriterCmd::Shutdown) => {
                    let _ = write_half.shutdown().await;
                    let _ = shutdown_tx.send(true);
                    break;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

/// Drains every complete newline-terminated message from the buffer, in
/// order, leaving any trailing partial message buffered. Carriage returns
/// are stripped and the payload is decoded as UTF-8.
pub fn split_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let mut raw: Vec<u8> = buffer.drain(..=pos).collect();
        raw.pop();
        raw.retain(|&b| b != b'\r');
        lines.push(String::from_utf8_lossy(&raw).into_owned());
    }
    lines
}
