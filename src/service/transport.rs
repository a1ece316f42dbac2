//! Frame transports
//!
//! A transport moves newline-delimited frames between the engine and a
//! single controller without ever blocking the tick. [`TcpTransport`] is the
//! real socket; [`LoopbackTransport`] is an in-memory stand-in for hosts that
//! embed the engine and for tests.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::string::FromUtf8Error;

use uuid::Uuid;

use crate::runtime::error::TransportError;

/// Longest accepted frame, excluding the newline.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const READ_CHUNK: usize = 64 * 1024;

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a single poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Nothing to do this tick.
    Idle,
    /// A controller connected.
    Connected(ConnectionId),
    /// One complete frame, without its line terminator.
    Frame {
        /// Connection that sent it.
        connection: ConnectionId,
        /// Frame text.
        line: String,
    },
    /// A frame that is not valid UTF-8. Answered, never decoded.
    Malformed {
        /// Connection that sent it.
        connection: ConnectionId,
        /// Why the bytes were rejected.
        reason: String,
    },
    /// The controller went away.
    Closed(ConnectionId),
}

/// Non-blocking, single-connection frame transport.
pub trait Transport {
    /// Make progress on I/O and report at most one event.
    fn poll_frame(&mut self) -> Inbound;

    /// Queue `line` (plus a newline) for `connection`.
    fn send(&mut self, connection: ConnectionId, line: &str) -> Result<(), TransportError>;

    /// Currently connected controller.
    fn active(&self) -> Option<ConnectionId>;
}

/// Pull the next non-blank line out of `buf`, stripping `\r\n` / `\n`.
fn take_line(buf: &mut Vec<u8>) -> Option<Result<String, FromUtf8Error>> {
    loop {
        let pos = buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        match String::from_utf8(line) {
            Ok(text) if text.trim().is_empty() => continue,
            other => return Some(other),
        }
    }
}

fn frame(connection: ConnectionId, line: Result<String, FromUtf8Error>) -> Inbound {
    match line {
        Ok(line) => Inbound::Frame { connection, line },
        Err(err) => Inbound::Malformed {
            connection,
            reason: err.utf8_error().to_string(),
        },
    }
}

#[derive(Debug)]
struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    eof: bool,
}

impl Connection {
    /// Write as much buffered output as the socket takes without blocking.
    fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// TCP listener serving one controller at a time.
///
/// A second client is not accepted while one is active; it waits in the
/// listen backlog until the first is observed closed.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    conn: Option<Connection>,
    dropped: Option<ConnectionId>,
}

impl TcpTransport {
    /// Bind a non-blocking listener.
    pub fn bind(addr: impl ToSocketAddrs + fmt::Display) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(TransportError::SocketCreate)?;
        if let Ok(local) = listener.local_addr() {
            tracing::info!(addr = %local, "listening for controllers");
        }
        Ok(Self {
            listener,
            conn: None,
            dropped: None,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    fn accept(&mut self) -> Inbound {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    tracing::warn!(%peer, error = %err, "rejecting connection");
                    return Inbound::Idle;
                }
                let _ = stream.set_nodelay(true);
                let id = ConnectionId::new();
                tracing::info!(connection = %id, %peer, "controller connected");
                self.conn = Some(Connection {
                    id,
                    peer,
                    stream,
                    inbound: Vec::new(),
                    outbound: Vec::new(),
                    eof: false,
                });
                Inbound::Connected(id)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Inbound::Idle,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                Inbound::Idle
            }
        }
    }

    fn close(&mut self, reason: &str) -> Inbound {
        match self.conn.take() {
            Some(conn) => {
                tracing::info!(connection = %conn.id, peer = %conn.peer, reason, "controller disconnected");
                Inbound::Closed(conn.id)
            }
            None => Inbound::Idle,
        }
    }
}

impl Transport for TcpTransport {
    fn poll_frame(&mut self) -> Inbound {
        if let Some(id) = self.dropped.take() {
            return Inbound::Closed(id);
        }
        let Some(conn) = self.conn.as_mut() else {
            return self.accept();
        };

        if let Err(err) = conn.flush() {
            tracing::warn!(connection = %conn.id, error = %err, "send failed");
            return self.close("send failed");
        }

        if let Some(line) = take_line(&mut conn.inbound) {
            return frame(conn.id, line);
        }
        if conn.eof {
            return self.close("peer closed");
        }

        let mut chunk = [0u8; READ_CHUNK];
        match conn.stream.read(&mut chunk) {
            Ok(0) => {
                conn.eof = true;
                match take_line(&mut conn.inbound) {
                    Some(line) => frame(conn.id, line),
                    None => self.close("peer closed"),
                }
            }
            Ok(n) => {
                conn.inbound.extend_from_slice(&chunk[..n]);
                if let Some(line) = take_line(&mut conn.inbound) {
                    return frame(conn.id, line);
                }
                if conn.inbound.len() > MAX_FRAME_LEN {
                    tracing::warn!(
                        connection = %conn.id,
                        buffered = conn.inbound.len(),
                        limit = MAX_FRAME_LEN,
                        "frame too large"
                    );
                    return self.close("frame too large");
                }
                Inbound::Idle
            }
            Err(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) =>
            {
                Inbound::Idle
            }
            Err(err) => {
                tracing::warn!(connection = %conn.id, error = %err, "receive failed");
                self.close("receive failed")
            }
        }
    }

    fn send(&mut self, connection: ConnectionId, line: &str) -> Result<(), TransportError> {
        let conn = match self.conn.as_mut() {
            Some(conn) if conn.id == connection => conn,
            _ => return Err(TransportError::NotConnected),
        };
        conn.outbound.extend_from_slice(line.as_bytes());
        conn.outbound.push(b'\n');
        if let Err(err) = conn.flush() {
            // Reported as Closed on the next poll.
            if let Inbound::Closed(id) = self.close("send failed") {
                self.dropped = Some(id);
            }
            return Err(TransportError::Io(err));
        }
        Ok(())
    }

    fn active(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(|conn| conn.id)
    }
}

/// In-memory transport.
///
/// Events queued with [`connect`](Self::connect), [`push_frame`](Self::push_frame)
/// and [`disconnect`](Self::disconnect) are returned one per poll, in order.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    active: Option<ConnectionId>,
    events: VecDeque<Inbound>,
    sent: Vec<(ConnectionId, String)>,
}

impl LoopbackTransport {
    /// Empty transport with no connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection, closing any current one.
    pub fn connect(&mut self) -> ConnectionId {
        self.disconnect();
        let id = ConnectionId::new();
        self.active = Some(id);
        self.events.push_back(Inbound::Connected(id));
        id
    }

    /// Queue a frame from the active connection, connecting first if needed.
    pub fn push_frame(&mut self, line: impl Into<String>) {
        let connection = match self.active {
            Some(id) => id,
            None => self.connect(),
        };
        self.events.push_back(Inbound::Frame {
            connection,
            line: line.into(),
        });
    }

    /// Queue raw frame bytes, checked for UTF-8 the way a socket frame is.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let connection = match self.active {
            Some(id) => id,
            None => self.connect(),
        };
        self.events
            .push_back(frame(connection, String::from_utf8(bytes.to_vec())));
    }

    /// Close the active connection.
    pub fn disconnect(&mut self) {
        if let Some(id) = self.active.take() {
            self.events.push_back(Inbound::Closed(id));
        }
    }

    /// Drain every line sent so far.
    pub fn take_sent(&mut self) -> Vec<String> {
        self.sent.drain(..).map(|(_, line)| line).collect()
    }

    /// Events not yet polled.
    pub fn queued(&self) -> usize {
        self.events.len()
    }
}

impl Transport for LoopbackTransport {
    fn poll_frame(&mut self) -> Inbound {
        self.events.pop_front().unwrap_or(Inbound::Idle)
    }

    fn send(&mut self, connection: ConnectionId, line: &str) -> Result<(), TransportError> {
        if self.active != Some(connection) {
            return Err(TransportError::NotConnected);
        }
        self.sent.push((connection, line.to_string()));
        Ok(())
    }

    fn active(&self) -> Option<ConnectionId> {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line_splits_and_skips_blank() {
        let mut buf = b"\n\r\n{\"a\":1}\r\n{\"b\"".to_vec();
        assert_eq!(take_line(&mut buf).unwrap().unwrap(), "{\"a\":1}");
        assert!(take_line(&mut buf).is_none());
        assert_eq!(buf, b"{\"b\"");

        buf.extend_from_slice(b":2}\n");
        assert_eq!(take_line(&mut buf).unwrap().unwrap(), "{\"b\":2}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_utf8_frame_is_not_rewritten() {
        let mut buf = b"{\"name\":\"get_game_\xffstate\"}\n{\"ok\":1}\n".to_vec();
        assert!(take_line(&mut buf).unwrap().is_err());
        assert_eq!(take_line(&mut buf).unwrap().unwrap(), "{\"ok\":1}");

        let mut transport = LoopbackTransport::new();
        transport.push_bytes(b"\xc3\x28");
        let id = transport.active().unwrap();
        assert_eq!(transport.poll_frame(), Inbound::Connected(id));
        match transport.poll_frame() {
            Inbound::Malformed { connection, .. } => assert_eq!(connection, id),
            other => panic!("expected malformed frame, got {other:?}"),
        }
    }

    #[test]
    fn test_loopback_event_order() {
        let mut transport = LoopbackTransport::new();
        assert_eq!(transport.poll_frame(), Inbound::Idle);

        transport.push_frame("x");
        let id = transport.active().unwrap();
        assert_eq!(transport.poll_frame(), Inbound::Connected(id));
        assert_eq!(
            transport.poll_frame(),
            Inbound::Frame {
                connection: id,
                line: "x".into()
            }
        );

        transport.send(id, "reply").unwrap();
        assert_eq!(transport.take_sent(), vec!["reply".to_string()]);

        transport.disconnect();
        assert!(matches!(
            transport.send(id, "late"),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(transport.poll_frame(), Inbound::Closed(id));
    }

    #[test]
    fn test_connection_ids_are_distinct() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_bind_failure_maps_to_code() {
        let first = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        let err = TcpTransport::bind(addr.to_string()).unwrap_err();
        assert_eq!(err.code(), crate::runtime::error::ErrorCode::SocketBindFailed);
    }
}
