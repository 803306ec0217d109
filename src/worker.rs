//! Workers: the per-client request loop and the response controller.
//!
//! A worker is one simulated client. It owns its connection, RNG, cookie
//! slot and authentication state outright; the only shared things it touches
//! are the plan (read-only) and the run state (one mutex). The controller
//! sits between the worker loop and the transaction engine: it classifies
//! each answer, follows redirects, re-bids challenges, and decides whether
//! the URL counts as a hit or a failure.

use std::sync::Arc;

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthState, Challenge, Scope};
use crate::config::RunConfig;
use crate::connect::Connection;
use crate::cookie::CookieRegistry;
use crate::error::{Error, Result};
use crate::plan::{Plan, Target, Walk};
use crate::report::Reporter;
use crate::stats::{RunState, WorkerStats};
use crate::transaction::{Engine, Session, Transaction};

/// How the main loop is bounded, fixed at worker start.
#[derive(Clone, Copy)]
enum Bound {
    Reps(usize),
    Deadline,
}

enum Fetch {
    Done,
    Cancelled,
}

pub(crate) struct Worker {
    id: usize,
    config: Arc<RunConfig>,
    plan: Arc<Plan>,
    cookies: Arc<CookieRegistry>,
    state: Arc<RunState>,
    reporter: Arc<Reporter>,
    engine: Engine,
    token: CancellationToken,
    rng: StdRng,
    auth: AuthState,
    conn: Connection,
    stats: WorkerStats,
    walk: Walk,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        seed: u64,
        engine: Engine,
        config: Arc<RunConfig>,
        plan: Arc<Plan>,
        cookies: Arc<CookieRegistry>,
        state: Arc<RunState>,
        reporter: Arc<Reporter>,
        token: CancellationToken,
    ) -> Worker {
        let conn = Connection::new(config.connection_max, config.socket_timeout);
        let walk = if config.internet {
            Walk::internet()
        } else {
            Walk::sequential()
        };
        Worker {
            id,
            config,
            plan,
            cookies,
            state,
            reporter,
            engine,
            token,
            rng: StdRng::seed_from_u64(seed),
            auth: AuthState::default(),
            conn,
            stats: WorkerStats::new(id),
            walk,
        }
    }

    pub(crate) async fn run(mut self) -> WorkerStats {
        // The login target runs once, outside the repetition and failure
        // accounting.
        if let Some(login) = self.plan.login().cloned() {
            self.auth.reset_www_bids();
            match self.guarded_fetch(&login).await {
                Ok(Fetch::Done) => self.stats.hits += 1,
                Ok(Fetch::Cancelled) => {}
                Err(err) => debug!("worker {}: login fetch failed: {err}", self.id),
            }
        }

        let bound = match (self.config.reps, self.config.time_limit) {
            (Some(reps), _) => Bound::Reps(reps),
            (None, Some(_)) => Bound::Deadline,
            (None, None) => Bound::Reps(0),
        };

        let mut done = 0usize;
        loop {
            if self.token.is_cancelled()
                || self.state.deadline_reached()
                || self.state.budget_exceeded()
            {
                break;
            }
            if let Bound::Reps(reps) = bound {
                if done >= reps {
                    break;
                }
            }

            let pick = self.walk.next(&mut self.rng, self.plan.len());
            if pick.wrapped && self.config.expire_cookies_on_wrap {
                self.cookies.clear(self.id);
            }
            let target = self.plan.get(pick.index).clone();

            self.auth.reset_www_bids();
            match self.guarded_fetch(&target).await {
                Ok(Fetch::Done) => self.stats.hits += 1,
                Ok(Fetch::Cancelled) => break,
                Err(err) => {
                    // 5xx answers already produced a transaction line
                    if !err.is_status() {
                        self.reporter.failure(self.id, &err);
                    }
                    self.state.record_failure();
                    if self.state.budget_exceeded() {
                        self.token.cancel();
                        break;
                    }
                }
            }
            done += 1;
        }

        self.conn.close();
        self.stats
    }

    /// Run one URL to resolution, or drop everything at cancellation. An
    /// interrupted connection is never left in a reusable state.
    async fn guarded_fetch(&mut self, target: &Target) -> Result<Fetch> {
        let token = self.token.clone();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.fetch(target) => Some(result),
        };
        match outcome {
            None => {
                self.conn.abort();
                Ok(Fetch::Cancelled)
            }
            Some(result) => result.map(|()| Fetch::Done),
        }
    }

    /// The response controller: drive one outer URL through the engine,
    /// following redirects and authentication challenges until the URL is
    /// resolved or fails.
    async fn fetch(&mut self, target: &Target) -> Result<()> {
        let mut current = target.clone();
        let mut depth = 0usize;
        loop {
            let tx = {
                let mut session = Session {
                    worker: self.id,
                    rng: &mut self.rng,
                    auth: &mut self.auth,
                    cookies: self.cookies.as_ref(),
                };
                self.engine
                    .execute(&mut self.conn, &current, &mut session)
                    .await?
            };
            self.record(&tx, &current);

            match tx.status.as_u16() {
                301 | 302 => {
                    if !self.config.follow_redirects {
                        return Ok(());
                    }
                    let location = match tx
                        .headers
                        .get(http::header::LOCATION)
                        .and_then(|value| value.to_str().ok())
                    {
                        Some(location) => location,
                        None => return Ok(()),
                    };
                    depth += 1;
                    if depth > self.config.redirect_limit {
                        return Err(Error::redirect_depth().with_url(current.url().clone()));
                    }
                    current = current.redirected(location)?;
                }
                401 => self.rebid(Scope::Www, &tx, &current)?,
                407 => self.rebid(Scope::Proxy, &tx, &current)?,
                code if code >= 500 => {
                    return Err(Error::server_error(tx.status).with_url(current.url().clone()))
                }
                _ => return Ok(()),
            }
        }
    }

    /// Answer a `401`/`407` challenge, spending one bid; terminal once the
    /// bid budget for this URL is gone or the challenge cannot be answered.
    fn rebid(&mut self, scope: Scope, tx: &Transaction, current: &Target) -> Result<()> {
        if self.auth.bids(scope) >= self.config.auth_bids.saturating_sub(1) {
            return Err(Error::auth_exhausted().with_url(current.url().clone()));
        }
        self.auth.note_bid(scope);

        let header = match scope {
            Scope::Www => http::header::WWW_AUTHENTICATE,
            Scope::Proxy => http::header::PROXY_AUTHENTICATE,
        };
        let challenge = tx
            .headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse)
            .ok_or_else(|| Error::auth_exhausted().with_url(current.url().clone()))?;
        let credentials = match scope {
            Scope::Www => self.config.credentials.as_ref(),
            Scope::Proxy => self.config.proxy_credentials.as_ref(),
        }
        .ok_or_else(|| Error::auth_exhausted().with_url(current.url().clone()))?;

        self.auth.accept(scope, &challenge, credentials)
    }

    /// Per-hop statistics, recorded whether or not a follow-up comes next.
    fn record(&mut self, tx: &Transaction, target: &Target) {
        self.stats.bytes += tx.bytes;
        self.stats.elapsed += tx.elapsed;
        let code = tx.status.as_u16();
        if code < 400 || code == 401 || code == 407 {
            self.stats.code_ok += 1;
        } else {
            self.stats.code_fail += 1;
        }
        if code == 200 {
            self.stats.ok200 += 1;
        }
        self.stats.observe(tx.elapsed);
        self.state.observe(tx.elapsed);
        self.reporter.transaction(self.id, tx, target);
    }
}
