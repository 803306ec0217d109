//! HTTP authentication: Basic and Digest challenge handling.
//!
//! A worker keeps one [`AuthState`] for its whole lifetime. When a server or
//! proxy challenges, the controller parses the `WWW-Authenticate` /
//! `Proxy-Authenticate` header into a [`Challenge`], accepts it with the
//! configured credentials, and re-executes the request. Basic answers are
//! encoded once; Digest answers keep the challenge around and produce a fresh
//! `Authorization` value per request (new cnonce, incremented nonce count).

use std::fmt;

use http::header::HeaderValue;
use http::Method;
use rand::Rng;

use crate::error::{Error, Result};

/// A username/password pair used to answer authentication challenges.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials from a username and password.
    pub fn new<U, P>(username: U, password: P) -> Credentials
    where
        U: Into<String>,
        P: Into<String>,
    {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse a `user:password` spec as given on the command line.
    pub fn parse(spec: &str) -> Result<Credentials> {
        match spec.split_once(':') {
            Some((user, pass)) if !user.is_empty() => Ok(Credentials::new(user, pass)),
            _ => Err(Error::builder(format!(
                "expected user:password, got {spec:?}"
            ))),
        }
    }

    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// The `Basic` authorization value for these credentials.
    pub(crate) fn basic_authorization(&self) -> HeaderValue {
        use base64::Engine as _;

        let encoded =
            base64::prelude::BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
            .expect("base64 is always valid header text");
        header.set_sensitive(true);
        header
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // never leak the password through Debug output
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"..")
            .finish()
    }
}

/// Which party issued the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Www,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChallengeScheme {
    Basic,
    Digest,
}

/// A parsed `WWW-Authenticate` / `Proxy-Authenticate` value.
#[derive(Debug, Clone)]
pub(crate) struct Challenge {
    pub(crate) scheme: ChallengeScheme,
    pub(crate) realm: String,
    pub(crate) nonce: Option<String>,
    pub(crate) opaque: Option<String>,
    pub(crate) qop: Option<String>,
}

impl Challenge {
    /// Parse a challenge header. Returns `None` for schemes this client does
    /// not speak, which the controller treats as terminal for the URL.
    pub(crate) fn parse(header: &str) -> Option<Challenge> {
        let (scheme, params) = match header.split_once(char::is_whitespace) {
            Some((s, rest)) => (s, rest),
            None => (header, ""),
        };
        let scheme = if scheme.eq_ignore_ascii_case("basic") {
            ChallengeScheme::Basic
        } else if scheme.eq_ignore_ascii_case("digest") {
            ChallengeScheme::Digest
        } else {
            return None;
        };

        let mut challenge = Challenge {
            scheme,
            realm: String::new(),
            nonce: None,
            opaque: None,
            qop: None,
        };
        for (key, value) in split_params(params) {
            if key.eq_ignore_ascii_case("realm") {
                challenge.realm = value;
            } else if key.eq_ignore_ascii_case("nonce") {
                challenge.nonce = Some(value);
            } else if key.eq_ignore_ascii_case("opaque") {
                challenge.opaque = Some(value);
            } else if key.eq_ignore_ascii_case("qop") {
                challenge.qop = Some(value);
            }
        }
        Some(challenge)
    }
}

/// Split `k1="v1", k2=v2, ...` into pairs, honoring quotes around values.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let eq = match rest.find('=') {
            Some(i) => i,
            None => break,
        };
        let key = rest[..eq].trim().to_owned();
        rest = &rest[eq + 1..];
        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            value = stripped[..end].to_owned();
            rest = stripped.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_owned();
            rest = rest.get(end..).unwrap_or("");
        }
        rest = rest.trim_start().strip_prefix(',').unwrap_or(rest).trim_start();
        pairs.push((key, value));
    }
    pairs
}

/// An RFC 2617 Digest session: the cached challenge plus the nonce count.
#[derive(Debug, Clone)]
pub(crate) struct DigestSession {
    credentials: Credentials,
    realm: String,
    nonce: String,
    opaque: Option<String>,
    qop_auth: bool,
    nc: u32,
}

impl DigestSession {
    pub(crate) fn new(credentials: &Credentials, challenge: &Challenge) -> Result<DigestSession> {
        let nonce = challenge
            .nonce
            .clone()
            .ok_or_else(|| Error::headers("digest challenge without nonce"))?;
        let qop_auth = challenge
            .qop
            .as_deref()
            .map(|qop| qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")))
            .unwrap_or(false);
        Ok(DigestSession {
            credentials: credentials.clone(),
            realm: challenge.realm.clone(),
            nonce,
            opaque: challenge.opaque.clone(),
            qop_auth,
            nc: 0,
        })
    }

    /// Compute the `Authorization` value for one request.
    pub(crate) fn authorization(&mut self, method: &Method, uri: &str, cnonce: &str) -> HeaderValue {
        let ha1 = hex_md5(&format!(
            "{}:{}:{}",
            self.credentials.username(),
            self.realm,
            self.credentials.password()
        ));
        let ha2 = hex_md5(&format!("{method}:{uri}"));

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            self.credentials.username(),
            self.realm,
            self.nonce,
            uri
        );
        let response = if self.qop_auth {
            self.nc += 1;
            let nc = format!("{:08x}", self.nc);
            value.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
            hex_md5(&format!(
                "{ha1}:{}:{nc}:{cnonce}:auth:{ha2}",
                self.nonce
            ))
        } else {
            hex_md5(&format!("{ha1}:{}:{ha2}", self.nonce))
        };
        value.push_str(&format!(", response=\"{response}\""));
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque=\"{opaque}\""));
        }
        value.push_str(", algorithm=MD5");

        let mut header =
            HeaderValue::from_str(&value).expect("digest parameters are always valid header text");
        header.set_sensitive(true);
        header
    }
}

fn hex_md5(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

enum Answer {
    Basic(HeaderValue),
    Digest(DigestSession),
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Answer::Basic(_) => f.write_str("Basic"),
            Answer::Digest(_) => f.write_str("Digest"),
        }
    }
}

/// Per-worker authentication state for both realm categories.
#[derive(Debug, Default)]
pub(crate) struct AuthState {
    www: Option<Answer>,
    proxy: Option<Answer>,
    bids_www: u32,
    bids_proxy: u32,
}

impl AuthState {
    /// A new outer URL request starts with a clean WWW bid count. Proxy bids
    /// accumulate for the worker's lifetime.
    pub(crate) fn reset_www_bids(&mut self) {
        self.bids_www = 0;
    }

    pub(crate) fn bids(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Www => self.bids_www,
            Scope::Proxy => self.bids_proxy,
        }
    }

    pub(crate) fn note_bid(&mut self, scope: Scope) {
        match scope {
            Scope::Www => self.bids_www += 1,
            Scope::Proxy => self.bids_proxy += 1,
        }
    }

    /// Accept a challenge, caching the answer for subsequent requests.
    pub(crate) fn accept(
        &mut self,
        scope: Scope,
        challenge: &Challenge,
        credentials: &Credentials,
    ) -> Result<()> {
        let answer = match challenge.scheme {
            ChallengeScheme::Basic => Answer::Basic(credentials.basic_authorization()),
            ChallengeScheme::Digest => {
                Answer::Digest(DigestSession::new(credentials, challenge)?)
            }
        };
        match scope {
            Scope::Www => self.www = Some(answer),
            Scope::Proxy => self.proxy = Some(answer),
        }
        Ok(())
    }

    /// The header value to attach to a request, if a challenge was answered.
    pub(crate) fn authorization<R: Rng>(
        &mut self,
        scope: Scope,
        method: &Method,
        uri: &str,
        rng: &mut R,
    ) -> Option<HeaderValue> {
        let answer = match scope {
            Scope::Www => self.www.as_mut()?,
            Scope::Proxy => self.proxy.as_mut()?,
        };
        Some(match answer {
            Answer::Basic(value) => value.clone(),
            Answer::Digest(session) => {
                let cnonce = format!("{:016x}", rng.gen::<u64>());
                session.authorization(method, uri, &cnonce)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn parse_basic_challenge() {
        let challenge = Challenge::parse("Basic realm=\"WallyWorld\"").unwrap();
        assert_eq!(challenge.scheme, ChallengeScheme::Basic);
        assert_eq!(challenge.realm, "WallyWorld");
    }

    #[test]
    fn parse_digest_challenge() {
        let challenge = Challenge::parse(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();
        assert_eq!(challenge.scheme, ChallengeScheme::Digest);
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(
            challenge.nonce.as_deref(),
            Some("dcd98b7102dd2f0e8b11d0f600bfb0c093")
        );
        assert_eq!(challenge.qop.as_deref(), Some("auth,auth-int"));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Challenge::parse("Negotiate").is_none());
        assert!(Challenge::parse("Bearer realm=\"x\"").is_none());
    }

    #[test]
    fn rfc2617_digest_vector() {
        // The worked example from RFC 2617 §3.5.
        let credentials = Credentials::new("Mufasa", "Circle Of Life");
        let challenge = Challenge::parse(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();
        let mut session = DigestSession::new(&credentials, &challenge).unwrap();
        let header = session.authorization(&Method::GET, "/dir/index.html", "0a4f113b");
        let text = std::str::from_utf8(header.as_bytes()).unwrap();
        assert!(
            text.contains("response=\"6629fae49393a05397450978507c4ef1\""),
            "unexpected digest: {text}"
        );
        assert!(text.contains("nc=00000001"));
        assert!(text.contains("uri=\"/dir/index.html\""));
    }

    #[test]
    fn digest_nc_increments_per_request() {
        let credentials = Credentials::new("u", "p");
        let challenge = Challenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth\"").unwrap();
        let mut session = DigestSession::new(&credentials, &challenge).unwrap();
        let first = session.authorization(&Method::GET, "/", "c1");
        let second = session.authorization(&Method::GET, "/", "c1");
        let first = std::str::from_utf8(first.as_bytes()).unwrap().to_owned();
        let second = std::str::from_utf8(second.as_bytes()).unwrap();
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }

    #[test]
    fn basic_authorization_encodes_credentials() {
        let header = Credentials::new("Aladdin", "open sesame").basic_authorization();
        assert_eq!(header.as_bytes(), b"Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert!(header.is_sensitive());
    }

    #[test]
    fn bid_accounting() {
        let mut auth = AuthState::default();
        assert_eq!(auth.bids(Scope::Www), 0);
        auth.note_bid(Scope::Www);
        auth.note_bid(Scope::Www);
        auth.note_bid(Scope::Proxy);
        assert_eq!(auth.bids(Scope::Www), 2);
        assert_eq!(auth.bids(Scope::Proxy), 1);
        auth.reset_www_bids();
        assert_eq!(auth.bids(Scope::Www), 0);
        assert_eq!(auth.bids(Scope::Proxy), 1);
    }

    #[test]
    fn authorization_requires_an_accepted_challenge() {
        let mut auth = AuthState::default();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(auth
            .authorization(Scope::Www, &Method::GET, "/", &mut rng)
            .is_none());

        let challenge = Challenge::parse("Basic realm=\"r\"").unwrap();
        auth.accept(Scope::Www, &challenge, &Credentials::new("u", "p"))
            .unwrap();
        let header = auth
            .authorization(Scope::Www, &Method::GET, "/", &mut rng)
            .unwrap();
        assert!(header.as_bytes().starts_with(b"Basic "));
    }

    #[test]
    fn credentials_parse() {
        let creds = Credentials::parse("jeff:sie:ge").unwrap();
        assert_eq!(creds.username(), "jeff");
        assert_eq!(creds.password(), "sie:ge");
        assert!(Credentials::parse("nopassword").is_err());
    }
}
