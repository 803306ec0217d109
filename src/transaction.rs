//! The transaction engine: one request/response on one connection.
//!
//! [`Engine::execute`] runs the ordered pipeline — protocol gate, think-time
//! jitter, transport (re)open, proxy tunnel, TLS, request write, head parse,
//! body drain, reuse decision — and reports either a completed
//! [`Transaction`] or the error that ended it. The engine never retries;
//! redirect and authentication follow-ups are the controller's business.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderMap, Method, StatusCode};
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;

use crate::auth::{AuthState, Scope};
use crate::config::RunConfig;
use crate::connect::Connection;
use crate::cookie::CookieRegistry;
use crate::error::{Error, Result};
use crate::plan::{Scheme, Target};
use crate::wire::{self, RequestParts};

/// The measured outcome of one completed request/response.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub(crate) status: StatusCode,
    pub(crate) bytes: u64,
    pub(crate) elapsed: Duration,
    pub(crate) protocol: String,
    pub(crate) headers: HeaderMap,
}

/// The worker-owned state a transaction needs besides the connection.
pub(crate) struct Session<'a> {
    pub(crate) worker: usize,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) auth: &'a mut AuthState,
    pub(crate) cookies: &'a CookieRegistry,
}

#[derive(Clone)]
pub(crate) struct Engine {
    config: Arc<RunConfig>,
    tls: tokio_native_tls::TlsConnector,
}

impl Engine {
    pub(crate) fn new(config: Arc<RunConfig>) -> Result<Engine> {
        let mut builder = native_tls::TlsConnector::builder();
        if config.accept_invalid_certs {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        let connector = builder.build().map_err(Error::tls)?;
        Ok(Engine {
            config,
            tls: tokio_native_tls::TlsConnector::from(connector),
        })
    }

    /// Execute one transaction. On failure the connection is torn down
    /// before the error is returned, so it can never be reused dirty.
    pub(crate) async fn execute(
        &self,
        conn: &mut Connection,
        target: &Target,
        session: &mut Session<'_>,
    ) -> Result<Transaction> {
        if target.scheme() == Scheme::Unsupported {
            return Err(Error::unsupported().with_url(target.url().clone()));
        }

        if !self.config.delay_max.is_zero() {
            let jitter = self.config.delay_max.mul_f64(session.rng.gen::<f64>());
            tokio::time::sleep(jitter).await;
        }

        let started = Instant::now();
        let result = self.transact(conn, target, session, started).await;
        if result.is_err() {
            conn.abort();
        }
        result.map_err(|e| e.with_url(target.url().clone()))
    }

    async fn transact(
        &self,
        conn: &mut Connection,
        target: &Target,
        session: &mut Session<'_>,
        started: Instant,
    ) -> Result<Transaction> {
        let https = target.scheme() == Scheme::Https;
        let proxy = self.config.proxy.as_ref();
        let proxied_plain = proxy.is_some() && !https;

        // The destination this connection is logically bound to: the origin,
        // except for plain HTTP through a proxy where any origin may ride
        // the same proxy socket.
        let (bound_host, bound_port) = match proxy {
            Some(p) if proxied_plain => (p.host().to_owned(), p.port()),
            _ => (target.host().to_owned(), target.port()),
        };

        if !(conn.is_live() && conn.peer_is(&bound_host, bound_port)) {
            let (socket_host, socket_port) = match proxy {
                Some(p) => (p.host(), p.port()),
                None => (target.host(), target.port()),
            };
            conn.open(socket_host, socket_port, self.config.connect_timeout)
                .await?;
            if https {
                if proxy.is_some() {
                    let proxy_authorization = session.auth.authorization(
                        Scope::Proxy,
                        &Method::CONNECT,
                        &format!("{}:{}", target.host(), target.port()),
                        session.rng,
                    );
                    conn.tunnel(target.host(), target.port(), proxy_authorization.as_ref())
                        .await?;
                }
                conn.secure(target.host(), &self.tls).await?;
            }
            conn.set_peer(&bound_host, bound_port);
        }

        let want_keepalive = self.config.keepalive && self.config.connection_max != 1;
        let path = target.request_path();
        let request_target = if proxied_plain {
            target.url().as_str().to_owned()
        } else {
            path.clone()
        };

        let parts = RequestParts {
            method: target.method(),
            target: request_target,
            host: target.host_header(),
            user_agent: &self.config.user_agent,
            keep_alive: want_keepalive,
            cookie: session.cookies.header_for(session.worker, target.url()),
            authorization: session
                .auth
                .authorization(Scope::Www, target.method(), &path, session.rng),
            proxy_authorization: if proxied_plain {
                session
                    .auth
                    .authorization(Scope::Proxy, target.method(), &path, session.rng)
            } else {
                None
            },
            body: target.body(),
        };
        conn.write_all(&wire::write_request(&parts)).await?;

        let head = wire::read_head(conn).await?;
        session.cookies.ingest(session.worker, &head.headers, target.url());
        let (bytes, framing_allows_reuse) = wire::read_body(conn, &head).await?;
        if !self.config.zero_ok && bytes == 0 {
            return Err(Error::zero_body());
        }
        let elapsed = started.elapsed();

        conn.mark_served();
        let keep = want_keepalive && framing_allows_reuse && head.keep_alive() && conn.within_cap();
        if keep {
            conn.set_reuse(true);
        } else {
            conn.close();
        }
        debug!(
            "worker {}: {} {} -> {} ({bytes} bytes, served {}, reuse {keep})",
            session.worker,
            target.method(),
            target.url(),
            head.status,
            conn.served(),
        );

        Ok(Transaction {
            status: head.status,
            bytes,
            elapsed,
            protocol: head.protocol(),
            headers: head.headers,
        })
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
