//! Transport connections: plain TCP, TLS, and proxy tunnels.
//!
//! A [`Connection`] is owned by exactly one worker for that worker's whole
//! lifetime. It may be torn down and reopened many times, but it is never
//! handed to another worker, so nothing here is synchronized.

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use http::header::HeaderValue;
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::error::{Error, Result};

const READ_CHUNK: usize = 16 * 1024;

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// A read-side transport fault, classified by the caller according to the
/// protocol phase it interrupted.
pub(crate) enum ReadFault {
    TimedOut,
    Io(io::Error),
}

pub(crate) struct Connection {
    stream: Option<Stream>,
    buf: BytesMut,
    reuse: bool,
    served: u32,
    cap: u32,
    peer: Option<(String, u16)>,
    socket_timeout: Duration,
}

impl Connection {
    /// An empty connection; nothing is opened until the first transaction.
    pub(crate) fn new(cap: u32, socket_timeout: Duration) -> Connection {
        Connection {
            stream: None,
            buf: BytesMut::with_capacity(READ_CHUNK),
            reuse: false,
            served: 0,
            cap,
            peer: None,
            socket_timeout,
        }
    }

    /// Whether the next transaction may ride the existing socket.
    pub(crate) fn is_live(&self) -> bool {
        self.reuse && self.stream.is_some()
    }

    /// The logical destination this connection is bound to. For a direct
    /// connection or a CONNECT tunnel that is the origin; for plain HTTP
    /// through a proxy it is the proxy itself.
    pub(crate) fn peer_is(&self, host: &str, port: u16) -> bool {
        matches!(&self.peer, Some((h, p)) if h == host && *p == port)
    }

    pub(crate) fn set_peer(&mut self, host: &str, port: u16) {
        self.peer = Some((host.to_owned(), port));
    }

    /// Open a fresh socket, discarding whatever was there before.
    pub(crate) async fn open(
        &mut self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<()> {
        self.abort();
        trace!("opening socket to {host}:{port}");
        let tcp = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::connect(e)),
            Err(_) => return Err(Error::connect_timeout()),
        };
        let _ = tcp.set_nodelay(true);
        self.stream = Some(Stream::Plain(tcp));
        self.served = 0;
        Ok(())
    }

    /// Ask a forward proxy for a tunnel to `host:port`. The tunnel must be
    /// granted with a `2xx` before any TLS bytes flow.
    pub(crate) async fn tunnel(
        &mut self,
        host: &str,
        port: u16,
        proxy_authorization: Option<&HeaderValue>,
    ) -> Result<()> {
        debug!("requesting tunnel to {host}:{port}");
        let mut request = Vec::with_capacity(128);
        request.extend_from_slice(format!("CONNECT {host}:{port} HTTP/1.1\r\n").as_bytes());
        request.extend_from_slice(format!("Host: {host}:{port}\r\n").as_bytes());
        if let Some(value) = proxy_authorization {
            request.extend_from_slice(b"Proxy-Authorization: ");
            request.extend_from_slice(value.as_bytes());
            request.extend_from_slice(b"\r\n");
        }
        request.extend_from_slice(b"\r\n");
        self.write_all(&request).await?;

        let head = crate::wire::read_head(self).await?;
        if !head.status.is_success() {
            self.abort();
            return Err(Error::proxy_tunnel(head.status));
        }
        Ok(())
    }

    /// Upgrade the socket to TLS. A no-op if the stream is already encrypted
    /// (a reused connection keeps its session).
    pub(crate) async fn secure(&mut self, domain: &str, tls: &TlsConnector) -> Result<()> {
        let tcp = match self.stream.take() {
            Some(Stream::Plain(tcp)) => tcp,
            Some(encrypted @ Stream::Tls(_)) => {
                self.stream = Some(encrypted);
                return Ok(());
            }
            None => return Err(Error::connect("socket not open")),
        };
        trace!("tls handshake with {domain}");
        match timeout(self.socket_timeout, tls.connect(domain, tcp)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(Stream::Tls(Box::new(stream)));
                Ok(())
            }
            Ok(Err(e)) => Err(Error::tls(e)),
            Err(_) => Err(Error::tls(crate::error::TimedOut)),
        }
    }

    /// Write the whole buffer, or fail and tear the connection down.
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::write("socket not open")),
        };
        let write = async {
            match stream {
                Stream::Plain(s) => s.write_all(bytes).await,
                Stream::Tls(s) => s.write_all(bytes).await,
            }
        };
        match timeout(self.socket_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.abort();
                Err(Error::write(e))
            }
            Err(_) => {
                self.abort();
                Err(Error::io_timeout())
            }
        }
    }

    /// Read more bytes into the internal buffer. `Ok(0)` means the peer
    /// closed; transport faults tear the connection down before returning.
    pub(crate) async fn fill(&mut self) -> std::result::Result<usize, ReadFault> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(ReadFault::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "socket not open",
                )))
            }
        };
        self.buf.reserve(READ_CHUNK);
        let buf = &mut self.buf;
        let read = async {
            match stream {
                Stream::Plain(s) => s.read_buf(buf).await,
                Stream::Tls(s) => s.read_buf(buf).await,
            }
        };
        match timeout(self.socket_timeout, read).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                self.abort();
                Err(ReadFault::Io(e))
            }
            Err(_) => {
                self.abort();
                Err(ReadFault::TimedOut)
            }
        }
    }

    /// The unconsumed bytes read so far.
    pub(crate) fn peek(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bookkeeping after a completed transaction.
    pub(crate) fn mark_served(&mut self) {
        self.served += 1;
    }

    pub(crate) fn served(&self) -> u32 {
        self.served
    }

    /// Whether the reuse cap permits another transaction on this socket.
    pub(crate) fn within_cap(&self) -> bool {
        self.cap == 0 || self.served < self.cap
    }

    pub(crate) fn set_reuse(&mut self, reuse: bool) {
        self.reuse = reuse;
    }

    /// Graceful close between transactions.
    pub(crate) fn close(&mut self) {
        self.abort();
    }

    /// Drop the socket and everything buffered; never reusable afterwards.
    pub(crate) fn abort(&mut self) {
        self.stream = None;
        self.reuse = false;
        self.peer = None;
        self.buf.clear();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field(
                "stream",
                &match &self.stream {
                    Some(Stream::Plain(_)) => "plain",
                    Some(Stream::Tls(_)) => "tls",
                    None => "closed",
                },
            )
            .field("reuse", &self.reuse)
            .field("served", &self.served)
            .field("peer", &self.peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_is_not_live() {
        let conn = Connection::new(0, Duration::from_secs(1));
        assert!(!conn.is_live());
        assert!(conn.within_cap());
        assert!(!conn.peer_is("origin.local", 80));
    }

    #[test]
    fn cap_counts_served_transactions() {
        let mut conn = Connection::new(2, Duration::from_secs(1));
        assert!(conn.within_cap());
        conn.mark_served();
        assert!(conn.within_cap());
        conn.mark_served();
        assert!(!conn.within_cap());
    }

    #[test]
    fn zero_cap_means_unlimited() {
        let mut conn = Connection::new(0, Duration::from_secs(1));
        for _ in 0..100 {
            conn.mark_served();
        }
        assert!(conn.within_cap());
    }

    #[test]
    fn abort_clears_reuse_and_peer() {
        let mut conn = Connection::new(0, Duration::from_secs(1));
        conn.set_peer("origin.local", 80);
        conn.set_reuse(true);
        conn.abort();
        assert!(!conn.is_live());
        assert!(!conn.peer_is("origin.local", 80));
    }
}
