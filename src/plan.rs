//! The URL plan: what the workers strike, and in which order.

use std::fmt;
use std::path::Path;

use http::Method;
use rand::Rng;
use url::Url;

use crate::error::{Error, Result};

/// The transport class of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// Anything else; fails without touching a socket.
    Unsupported,
}

/// One immutable request template in the plan.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    method: Method,
    body: Option<String>,
    id: usize,
}

impl Target {
    /// Parse a plan entry: `URL` or `URL POST body...`. Entries without a
    /// scheme default to `http://`.
    pub fn parse(spec: &str, id: usize) -> Result<Target> {
        let spec = spec.trim();
        let (url_part, rest) = match spec.split_once(char::is_whitespace) {
            Some((url, rest)) => (url, rest.trim_start()),
            None => (spec, ""),
        };

        let (method, body) = if rest.is_empty() {
            (Method::GET, None)
        } else if let Some(body) = rest.strip_prefix("POST") {
            (Method::POST, Some(body.trim_start().to_owned()))
        } else {
            return Err(Error::builder(format!("malformed plan entry: {spec:?}")));
        };

        let text = if url_part.contains("://") {
            url_part.to_owned()
        } else {
            format!("http://{url_part}")
        };
        let url = Url::parse(&text).map_err(Error::builder)?;
        if url.host_str().is_none() {
            return Err(Error::builder(format!("plan entry has no host: {spec:?}")));
        }

        Ok(Target {
            url,
            method,
            body,
            id,
        })
    }

    /// The parsed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The POST body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// The stable index of this target within its plan.
    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn scheme(&self) -> Scheme {
        match self.url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => Scheme::Unsupported,
        }
    }

    pub(crate) fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub(crate) fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(0)
    }

    /// The origin-form request target: path plus query.
    pub(crate) fn request_path(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_owned(),
        }
    }

    /// The `Host` header value, omitting default ports.
    pub(crate) fn host_header(&self) -> String {
        let host = self.host();
        match (self.scheme(), self.port()) {
            (Scheme::Http, 80) | (Scheme::Https, 443) => host.to_owned(),
            (_, port) => format!("{host}:{port}"),
        }
    }

    /// The target a `Location` header points at. A value without a scheme
    /// resolves against this target and replays it: host, port, protocol,
    /// method and body all carry over, only the path changes. An absolute
    /// Location is a fresh GET, the way a new plan entry would be.
    pub(crate) fn redirected(&self, location: &str) -> Result<Target> {
        match Url::parse(location) {
            Ok(url) => Ok(Target {
                url,
                method: Method::GET,
                body: None,
                id: self.id,
            }),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Target {
                url: self.url.join(location).map_err(Error::builder)?,
                method: self.method.clone(),
                body: self.body.clone(),
                id: self.id,
            }),
            Err(e) => Err(Error::builder(e)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An immutable ordered sequence of targets, shared by all workers.
#[derive(Debug, Clone)]
pub struct Plan {
    targets: Vec<Target>,
    login: Option<Target>,
}

impl Plan {
    /// Build a plan from parsed targets. A plan is never empty.
    pub fn new(targets: Vec<Target>) -> Result<Plan> {
        if targets.is_empty() {
            return Err(Error::builder("the url plan is empty"));
        }
        Ok(Plan {
            targets,
            login: None,
        })
    }

    /// Parse a plan from entry strings, e.g. command-line URLs.
    pub fn from_specs<I, S>(specs: I) -> Result<Plan>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut targets = Vec::new();
        for spec in specs {
            let id = targets.len();
            targets.push(Target::parse(spec.as_ref(), id)?);
        }
        Plan::new(targets)
    }

    /// Load a plan from a URL file: one entry per line, blank lines and
    /// `#` comments skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Plan> {
        let text = std::fs::read_to_string(path).map_err(Error::builder)?;
        Plan::from_specs(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Attach a login target, executed once per worker before its main loop.
    pub fn with_login(mut self, target: Target) -> Plan {
        self.login = Some(target);
        self
    }

    /// Number of targets in the plan.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the plan holds no targets. Never true for a built `Plan`.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub(crate) fn get(&self, index: usize) -> &Target {
        &self.targets[index]
    }

    pub(crate) fn login(&self) -> Option<&Target> {
        self.login.as_ref()
    }
}

/// The outcome of one plan selection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pick {
    pub(crate) index: usize,
    /// True when a sequential walk starts the plan over. The cookie slate is
    /// wiped at this boundary when the run asks for it.
    pub(crate) wrapped: bool,
}

/// How a worker walks the plan. Each worker owns its cursor; there is no
/// coordination between workers.
#[derive(Debug)]
pub(crate) enum Walk {
    Sequential { cursor: usize },
    Internet,
}

impl Walk {
    pub(crate) fn sequential() -> Walk {
        Walk::Sequential { cursor: 0 }
    }

    pub(crate) fn internet() -> Walk {
        Walk::Internet
    }

    pub(crate) fn next<R: Rng>(&mut self, rng: &mut R, len: usize) -> Pick {
        match self {
            Walk::Sequential { cursor } => {
                let wrapped = *cursor >= len;
                if wrapped {
                    *cursor = 0;
                }
                let index = *cursor;
                *cursor += 1;
                Pick { index, wrapped }
            }
            Walk::Internet => Pick {
                index: rng.gen_range(0..len),
                wrapped: false,
            },
        }
    }
}
