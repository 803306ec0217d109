use std::{error::Error as StdError, fmt, io};

use http::StatusCode;
use url::Url;

/// A `Result` alias where the `Err` case is `stampede::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The errors that may occur while striking a target.
///
/// Note: errors may include the full URL of the transaction that produced
/// them. If the URL contains sensitive information (e.g. an API key as a
/// query parameter), strip it with [`without_url`](Error::without_url).
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    url: Option<Url>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                url: None,
            }),
        }
    }

    pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Builder, Some(e))
    }

    pub(crate) fn unsupported() -> Error {
        Error::new(Kind::Unsupported, None::<Error>)
    }

    pub(crate) fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    pub(crate) fn connect_timeout() -> Error {
        Error::new(Kind::ConnectTimeout, Some(TimedOut))
    }

    pub(crate) fn tls<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Tls, Some(e))
    }

    pub(crate) fn proxy_tunnel(status: StatusCode) -> Error {
        Error::new(Kind::ProxyTunnel(status), None::<Error>)
    }

    pub(crate) fn write<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Write, Some(e))
    }

    pub(crate) fn headers<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Headers, Some(e))
    }

    pub(crate) fn body<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Body, Some(e))
    }

    pub(crate) fn zero_body() -> Error {
        Error::new(Kind::ZeroBody, None::<Error>)
    }

    pub(crate) fn io_timeout() -> Error {
        Error::new(Kind::IoTimeout, Some(TimedOut))
    }

    pub(crate) fn auth_exhausted() -> Error {
        Error::new(Kind::AuthExhausted, None::<Error>)
    }

    pub(crate) fn redirect_depth() -> Error {
        Error::new(Kind::RedirectDepth, None::<Error>)
    }

    pub(crate) fn server_error(status: StatusCode) -> Error {
        Error::new(Kind::Status(status), None::<Error>)
    }
}

impl Error {
    /// Returns a possible URL related to this error.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Add a URL related to this error (overwriting any existing).
    pub fn with_url(mut self, url: Url) -> Self {
        self.inner.url = Some(url);
        self
    }

    /// Strip the related URL from this error (if, for example, it contains
    /// sensitive information).
    pub fn without_url(mut self) -> Self {
        self.inner.url = None;
        self
    }

    /// Returns true if the error came from assembling the run configuration
    /// or the URL plan.
    pub fn is_builder(&self) -> bool {
        matches!(self.inner.kind, Kind::Builder)
    }

    /// Returns true if the target's protocol is not HTTP or HTTPS.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.inner.kind, Kind::Unsupported)
    }

    /// Returns true if the error is related to establishing a transport.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect | Kind::ConnectTimeout)
    }

    /// Returns true if the error is related to TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::Tls)
    }

    /// Returns true if a forward proxy refused the `CONNECT` tunnel.
    pub fn is_proxy_tunnel(&self) -> bool {
        matches!(self.inner.kind, Kind::ProxyTunnel(_))
    }

    /// Returns true if the error is related to a timeout.
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::ConnectTimeout | Kind::IoTimeout) {
            return true;
        }

        let mut source = self.source();
        while let Some(err) = source {
            if err.is::<TimedOut>() {
                return true;
            }
            if let Some(io) = err.downcast_ref::<io::Error>() {
                if io.kind() == io::ErrorKind::TimedOut {
                    return true;
                }
            }
            source = err.source();
        }

        false
    }

    /// Returns true if the server answered with a zero-length body and
    /// `zero_ok` was off.
    pub fn is_zero_body(&self) -> bool {
        matches!(self.inner.kind, Kind::ZeroBody)
    }

    /// Returns true if the authentication bid budget ran out.
    pub fn is_auth_exhausted(&self) -> bool {
        matches!(self.inner.kind, Kind::AuthExhausted)
    }

    /// Returns true if a redirect chain exceeded the depth cap.
    pub fn is_redirect_depth(&self) -> bool {
        matches!(self.inner.kind, Kind::RedirectDepth)
    }

    /// Returns true if the error is a `5xx` answer from the server.
    pub fn is_status(&self) -> bool {
        matches!(self.inner.kind, Kind::Status(_))
    }

    /// Returns the status code, if the error was produced by a `5xx` answer.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.kind {
            Kind::Status(code) => Some(code),
            Kind::ProxyTunnel(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("stampede::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref url) = self.inner.url {
            builder.field("url", url);
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Builder => f.write_str("builder error")?,
            Kind::Unsupported => f.write_str("protocol not supported")?,
            Kind::Connect => f.write_str("connection failed")?,
            Kind::ConnectTimeout => f.write_str("connection timed out")?,
            Kind::Tls => f.write_str("tls handshake failed")?,
            Kind::ProxyTunnel(ref code) => write!(f, "proxy refused tunnel ({code})")?,
            Kind::Write => f.write_str("error writing request")?,
            Kind::Headers => f.write_str("invalid response headers")?,
            Kind::Body => f.write_str("error reading response body")?,
            Kind::ZeroBody => f.write_str("zero bytes back from server")?,
            Kind::IoTimeout => f.write_str("socket operation timed out")?,
            Kind::AuthExhausted => f.write_str("authentication bids exhausted")?,
            Kind::RedirectDepth => f.write_str("too many redirects")?,
            Kind::Status(ref code) => write!(f, "HTTP server error ({code})")?,
        };

        if let Some(url) = &self.inner.url {
            write!(f, " for url ({url})")?;
        }

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    Builder,
    Unsupported,
    Connect,
    ConnectTimeout,
    Tls,
    ProxyTunnel(StatusCode),
    Write,
    Headers,
    Body,
    ZeroBody,
    IoTimeout,
    AuthExhausted,
    RedirectDepth,
    Status(StatusCode),
}

#[derive(Debug)]
pub(crate) struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}
