//! The HTTP/1.1 wire codec: request serialization, response head parsing,
//! and body framing.

use bytes::Buf;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING,
};
use http::{Method, StatusCode};

use crate::connect::{Connection, ReadFault};
use crate::error::{Error, Result};

const MAX_HEADERS: usize = 100;
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_LINE_BYTES: usize = 8 * 1024;

/// A parsed response status line and header block.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) minor: u8,
    pub(crate) headers: HeaderMap,
}

impl ResponseHead {
    /// The protocol token of the status line, e.g. `HTTP/1.1`.
    pub(crate) fn protocol(&self) -> String {
        format!("HTTP/1.{}", self.minor)
    }

    pub(crate) fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|text| text.trim().parse().ok())
    }

    pub(crate) fn is_chunked(&self) -> bool {
        self.headers
            .get(TRANSFER_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|text| {
                text.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false)
    }

    /// Whether the response consents to another transaction on this
    /// connection: HTTP/1.1 unless told `close`, HTTP/1.0 only when told
    /// `keep-alive`.
    pub(crate) fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get(CONNECTION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if self.minor == 0 {
            connection.eq_ignore_ascii_case("keep-alive")
        } else {
            !connection
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
        }
    }
}

/// Everything needed to serialize one request.
pub(crate) struct RequestParts<'a> {
    pub(crate) method: &'a Method,
    /// Origin-form path, or the absolute URL when talking through a plain
    /// HTTP proxy.
    pub(crate) target: String,
    pub(crate) host: String,
    pub(crate) user_agent: &'a str,
    pub(crate) keep_alive: bool,
    pub(crate) cookie: Option<HeaderValue>,
    pub(crate) authorization: Option<HeaderValue>,
    pub(crate) proxy_authorization: Option<HeaderValue>,
    pub(crate) body: Option<&'a str>,
}

pub(crate) fn write_request(parts: &RequestParts<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", parts.method, parts.target).as_bytes());
    out.extend_from_slice(format!("Host: {}\r\n", parts.host).as_bytes());
    out.extend_from_slice(format!("User-Agent: {}\r\n", parts.user_agent).as_bytes());
    out.extend_from_slice(b"Accept: */*\r\n");
    if parts.keep_alive {
        out.extend_from_slice(b"Connection: keep-alive\r\n");
    } else {
        out.extend_from_slice(b"Connection: close\r\n");
    }
    if let Some(cookie) = &parts.cookie {
        out.extend_from_slice(b"Cookie: ");
        out.extend_from_slice(cookie.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if let Some(authorization) = &parts.authorization {
        out.extend_from_slice(b"Authorization: ");
        out.extend_from_slice(authorization.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if let Some(proxy_authorization) = &parts.proxy_authorization {
        out.extend_from_slice(b"Proxy-Authorization: ");
        out.extend_from_slice(proxy_authorization.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if let Some(body) = parts.body {
        out.extend_from_slice(b"Content-Type: application/x-www-form-urlencoded\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body.as_bytes());
    } else {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read and parse a response head, leaving any body bytes buffered.
pub(crate) async fn read_head(conn: &mut Connection) -> Result<ResponseHead> {
    loop {
        let parsed = {
            let buf = conn.peek();
            if buf.is_empty() {
                None
            } else {
                let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut response = httparse::Response::new(&mut slots);
                match response.parse(buf) {
                    Ok(httparse::Status::Complete(len)) => Some((len, assemble(&response)?)),
                    Ok(httparse::Status::Partial) => {
                        if buf.len() > MAX_HEAD_BYTES {
                            return Err(Error::headers("response head too large"));
                        }
                        None
                    }
                    Err(e) => return Err(Error::headers(e)),
                }
            }
        };
        if let Some((len, head)) = parsed {
            conn.buffer().advance(len);
            return Ok(head);
        }
        match conn.fill().await {
            Ok(0) => return Err(Error::headers("connection closed before end of headers")),
            Ok(_) => {}
            Err(ReadFault::TimedOut) => return Err(Error::io_timeout()),
            Err(ReadFault::Io(e)) => return Err(Error::headers(e)),
        }
    }
}

fn assemble(response: &httparse::Response<'_, '_>) -> Result<ResponseHead> {
    let code = response
        .code
        .ok_or_else(|| Error::headers("missing status code"))?;
    let status = StatusCode::from_u16(code).map_err(Error::headers)?;
    let minor = response.version.unwrap_or(1) as u8;

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(Error::headers)?;
        let value = HeaderValue::from_bytes(header.value).map_err(Error::headers)?;
        headers.append(name, value);
    }

    Ok(ResponseHead {
        status,
        minor,
        headers,
    })
}

/// How the body of a response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// No body by definition (1xx, 204, 304).
    Empty,
    Length(u64),
    Chunked,
    /// Unframed: the body runs to EOF and the connection cannot be reused.
    Close,
}

pub(crate) fn framing(head: &ResponseHead) -> BodyFraming {
    if head.status.is_informational()
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED
    {
        return BodyFraming::Empty;
    }
    if head.is_chunked() {
        return BodyFraming::Chunked;
    }
    match head.content_length() {
        Some(length) => BodyFraming::Length(length),
        None => BodyFraming::Close,
    }
}

/// Drain the body, returning the entity byte count and whether the framing
/// leaves the connection usable for another transaction.
pub(crate) async fn read_body(conn: &mut Connection, head: &ResponseHead) -> Result<(u64, bool)> {
    match framing(head) {
        BodyFraming::Empty => Ok((0, true)),
        BodyFraming::Length(length) => {
            consume(conn, length).await?;
            Ok((length, true))
        }
        BodyFraming::Chunked => {
            let total = read_chunked(conn).await?;
            Ok((total, true))
        }
        BodyFraming::Close => {
            let mut total = conn.peek().len() as u64;
            conn.buffer().clear();
            loop {
                match conn.fill().await {
                    Ok(0) => break,
                    Ok(n) => {
                        total += n as u64;
                        conn.buffer().clear();
                    }
                    Err(ReadFault::TimedOut) => return Err(Error::io_timeout()),
                    Err(ReadFault::Io(e)) => return Err(Error::body(e)),
                }
            }
            Ok((total, false))
        }
    }
}

/// Consume exactly `n` buffered-or-read bytes.
async fn consume(conn: &mut Connection, n: u64) -> Result<()> {
    let mut remaining = n;
    loop {
        let have = conn.peek().len() as u64;
        if have >= remaining {
            conn.buffer().advance(remaining as usize);
            return Ok(());
        }
        remaining -= have;
        conn.buffer().clear();
        match conn.fill().await {
            Ok(0) => return Err(Error::body("connection closed mid-body")),
            Ok(_) => {}
            Err(ReadFault::TimedOut) => return Err(Error::io_timeout()),
            Err(ReadFault::Io(e)) => return Err(Error::body(e)),
        }
    }
}

async fn read_chunked(conn: &mut Connection) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let line = read_line(conn).await?;
        let size = parse_chunk_size(&line)?;
        if size == 0 {
            // trailers, then the final blank line
            loop {
                if read_line(conn).await?.is_empty() {
                    return Ok(total);
                }
            }
        }
        consume(conn, size).await?;
        // chunk data is followed by its own CRLF
        consume(conn, 2).await?;
        total += size;
    }
}

pub(crate) fn parse_chunk_size(line: &str) -> Result<u64> {
    let size = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16).map_err(|_| Error::body(format!("invalid chunk size: {line:?}")))
}

async fn read_line(conn: &mut Connection) -> Result<String> {
    loop {
        let (found, buffered) = {
            let buf = conn.peek();
            (
                buf.windows(2).position(|pair| pair == b"\r\n"),
                buf.len(),
            )
        };
        if let Some(pos) = found {
            let line = conn.buffer().split_to(pos);
            conn.buffer().advance(2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        if buffered > MAX_LINE_BYTES {
            return Err(Error::body("chunk line too long"));
        }
        match conn.fill().await {
            Ok(0) => return Err(Error::body("connection closed mid-body")),
            Ok(_) => {}
            Err(ReadFault::TimedOut) => return Err(Error::io_timeout()),
            Err(ReadFault::Io(e)) => return Err(Error::body(e)),
        }
    }
}
