//! Run configuration.
//!
//! A [`RunConfig`] is assembled once through [`ConfigBuilder`] and shared
//! read-only by every worker for the lifetime of the run.

use std::time::Duration;

use crate::auth::Credentials;
use crate::error::{Error, Result};

/// A forward proxy all requests are routed through.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    host: String,
    port: u16,
}

impl ProxyServer {
    /// Create a proxy from a host and port.
    pub fn new<H: Into<String>>(host: H, port: u16) -> ProxyServer {
        ProxyServer {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` or a full `http://host:port` URL.
    pub fn parse(spec: &str) -> Result<ProxyServer> {
        if spec.contains("://") {
            let url = url::Url::parse(spec).map_err(Error::builder)?;
            let host = url
                .host_str()
                .ok_or_else(|| Error::builder(format!("proxy url has no host: {spec:?}")))?;
            return Ok(ProxyServer::new(host, url.port().unwrap_or(3128)));
        }
        match spec.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::builder(format!("invalid proxy port in {spec:?}")))?;
                Ok(ProxyServer::new(host, port))
            }
            _ => Err(Error::builder(format!(
                "expected host:port for proxy, got {spec:?}"
            ))),
        }
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

/// Everything a run needs to know, fixed before the first worker spawns.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub(crate) concurrency: usize,
    pub(crate) reps: Option<usize>,
    pub(crate) time_limit: Option<Duration>,
    pub(crate) internet: bool,
    pub(crate) keepalive: bool,
    pub(crate) connection_max: u32,
    pub(crate) delay_max: Duration,
    pub(crate) follow_redirects: bool,
    pub(crate) redirect_limit: usize,
    pub(crate) auth_bids: u32,
    pub(crate) expire_cookies_on_wrap: bool,
    pub(crate) failure_budget: u64,
    pub(crate) socket_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) proxy: Option<ProxyServer>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) proxy_credentials: Option<Credentials>,
    pub(crate) user_agent: String,
    pub(crate) accept_invalid_certs: bool,
    pub(crate) zero_ok: bool,
    pub(crate) rng_seed: Option<u64>,
    pub(crate) verbose: bool,
    pub(crate) csv: bool,
    pub(crate) color: bool,
    pub(crate) timestamp: bool,
    pub(crate) mark: Option<String>,
    pub(crate) fullurl: bool,
    pub(crate) show_id: bool,
}

impl RunConfig {
    /// Start building a `RunConfig`.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// The number of simulated clients.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// A builder to assemble a [`RunConfig`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: RunConfig,
}

impl Default for ConfigBuilder {
    fn default() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

impl ConfigBuilder {
    /// A builder seeded with the stock defaults.
    pub fn new() -> ConfigBuilder {
        ConfigBuilder {
            config: RunConfig {
                concurrency: 1,
                reps: None,
                time_limit: None,
                internet: false,
                keepalive: true,
                connection_max: 0,
                delay_max: Duration::ZERO,
                follow_redirects: true,
                redirect_limit: 10,
                auth_bids: 3,
                expire_cookies_on_wrap: false,
                failure_budget: 1024,
                socket_timeout: Duration::from_secs(30),
                connect_timeout: Duration::from_secs(10),
                proxy: None,
                credentials: None,
                proxy_credentials: None,
                user_agent: concat!("stampede/", env!("CARGO_PKG_VERSION")).to_owned(),
                accept_invalid_certs: false,
                zero_ok: false,
                rng_seed: None,
                verbose: false,
                csv: false,
                color: true,
                timestamp: false,
                mark: None,
                fullurl: false,
                show_id: false,
            },
        }
    }

    /// How many workers run in parallel.
    pub fn concurrency(mut self, n: usize) -> ConfigBuilder {
        self.config.concurrency = n;
        self
    }

    /// Stop each worker after `reps` plan iterations.
    pub fn reps(mut self, reps: usize) -> ConfigBuilder {
        self.config.reps = Some(reps);
        self
    }

    /// Stop the run after a wall-clock duration.
    pub fn time_limit(mut self, limit: Duration) -> ConfigBuilder {
        self.config.time_limit = Some(limit);
        self
    }

    /// Pick plan entries at random instead of walking them in order.
    pub fn internet(mut self, enabled: bool) -> ConfigBuilder {
        self.config.internet = enabled;
        self
    }

    /// Reuse connections when the server consents.
    pub fn keepalive(mut self, enabled: bool) -> ConfigBuilder {
        self.config.keepalive = enabled;
        self
    }

    /// Requests served over one connection before it is recycled.
    /// `0` means unlimited, `1` disables reuse outright.
    pub fn connection_max(mut self, max: u32) -> ConfigBuilder {
        self.config.connection_max = max;
        self
    }

    /// Upper bound for the random think time before each transaction.
    pub fn delay_max(mut self, delay: Duration) -> ConfigBuilder {
        self.config.delay_max = delay;
        self
    }

    /// Follow `301`/`302` answers.
    pub fn follow_redirects(mut self, enabled: bool) -> ConfigBuilder {
        self.config.follow_redirects = enabled;
        self
    }

    /// How deep a redirect chain may go before it counts as a failure.
    pub fn redirect_limit(mut self, limit: usize) -> ConfigBuilder {
        self.config.redirect_limit = limit;
        self
    }

    /// Authentication attempts per URL and challenge source.
    pub fn auth_bids(mut self, bids: u32) -> ConfigBuilder {
        self.config.auth_bids = bids;
        self
    }

    /// Drop a worker's cookies whenever its sequential cursor wraps.
    pub fn expire_cookies_on_wrap(mut self, enabled: bool) -> ConfigBuilder {
        self.config.expire_cookies_on_wrap = enabled;
        self
    }

    /// Abort the whole run once this many transactions have failed.
    /// `0` disables the budget.
    pub fn failure_budget(mut self, budget: u64) -> ConfigBuilder {
        self.config.failure_budget = budget;
        self
    }

    /// Timeout applied to every socket read and write.
    pub fn socket_timeout(mut self, timeout: Duration) -> ConfigBuilder {
        self.config.socket_timeout = timeout;
        self
    }

    /// Timeout for establishing a transport.
    pub fn connect_timeout(mut self, timeout: Duration) -> ConfigBuilder {
        self.config.connect_timeout = timeout;
        self
    }

    /// Route all requests through a forward proxy.
    pub fn proxy(mut self, proxy: ProxyServer) -> ConfigBuilder {
        self.config.proxy = Some(proxy);
        self
    }

    /// Credentials offered to `WWW-Authenticate` challenges.
    pub fn credentials(mut self, credentials: Credentials) -> ConfigBuilder {
        self.config.credentials = Some(credentials);
        self
    }

    /// Credentials offered to `Proxy-Authenticate` challenges.
    pub fn proxy_credentials(mut self, credentials: Credentials) -> ConfigBuilder {
        self.config.proxy_credentials = Some(credentials);
        self
    }

    /// The `User-Agent` sent with every request.
    pub fn user_agent<V: Into<String>>(mut self, agent: V) -> ConfigBuilder {
        self.config.user_agent = agent.into();
        self
    }

    /// Skip TLS certificate verification.
    pub fn accept_invalid_certs(mut self, accept: bool) -> ConfigBuilder {
        self.config.accept_invalid_certs = accept;
        self
    }

    /// Treat zero-length response bodies as success.
    pub fn zero_ok(mut self, ok: bool) -> ConfigBuilder {
        self.config.zero_ok = ok;
        self
    }

    /// Seed the worker RNGs for a reproducible run.
    pub fn rng_seed(mut self, seed: u64) -> ConfigBuilder {
        self.config.rng_seed = Some(seed);
        self
    }

    /// Print a line per transaction.
    pub fn verbose(mut self, enabled: bool) -> ConfigBuilder {
        self.config.verbose = enabled;
        self
    }

    /// Emit verbose lines as CSV records.
    pub fn csv(mut self, enabled: bool) -> ConfigBuilder {
        self.config.csv = enabled;
        self
    }

    /// Colorize verbose lines by response class.
    pub fn color(mut self, enabled: bool) -> ConfigBuilder {
        self.config.color = enabled;
        self
    }

    /// Prefix verbose lines with the wall time.
    pub fn timestamp(mut self, enabled: bool) -> ConfigBuilder {
        self.config.timestamp = enabled;
        self
    }

    /// A caller-chosen string carried in every CSV record.
    pub fn mark<V: Into<String>>(mut self, mark: V) -> ConfigBuilder {
        self.config.mark = Some(mark.into());
        self
    }

    /// Show the full URL instead of the path in verbose lines.
    pub fn fullurl(mut self, enabled: bool) -> ConfigBuilder {
        self.config.fullurl = enabled;
        self
    }

    /// Show the worker id in verbose lines.
    pub fn show_id(mut self, enabled: bool) -> ConfigBuilder {
        self.config.show_id = enabled;
        self
    }

    /// Validate and produce the final `RunConfig`.
    pub fn build(self) -> Result<RunConfig> {
        let config = self.config;
        if config.concurrency == 0 {
            return Err(Error::builder("concurrency must be at least 1"));
        }
        if config.auth_bids == 0 {
            return Err(Error::builder("auth_bids must be at least 1"));
        }
        if config.reps.is_none() && config.time_limit.is_none() {
            return Err(Error::builder(
                "either reps or a time limit must bound the run",
            ));
        }
        if config.socket_timeout.is_zero() || config.connect_timeout.is_zero() {
            return Err(Error::builder("timeouts must be non-zero"));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = RunConfig::builder().reps(1).build().unwrap();
        assert_eq!(config.concurrency, 1);
        assert!(config.keepalive);
        assert_eq!(config.connection_max, 0);
        assert!(config.follow_redirects);
        assert_eq!(config.redirect_limit, 10);
        assert_eq!(config.auth_bids, 3);
        assert_eq!(config.failure_budget, 1024);
        assert!(!config.zero_ok);
    }

    #[test]
    fn build_requires_a_bound() {
        assert!(RunConfig::builder().build().is_err());
        assert!(RunConfig::builder().reps(1).build().is_ok());
        assert!(RunConfig::builder()
            .time_limit(Duration::from_secs(5))
            .build()
            .is_ok());
    }

    #[test]
    fn build_rejects_nonsense() {
        assert!(RunConfig::builder().reps(1).concurrency(0).build().is_err());
        assert!(RunConfig::builder().reps(1).auth_bids(0).build().is_err());
        assert!(RunConfig::builder()
            .reps(1)
            .socket_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn proxy_parse_forms() {
        let proxy = ProxyServer::parse("cache.local:3128").unwrap();
        assert_eq!(proxy.host(), "cache.local");
        assert_eq!(proxy.port(), 3128);

        let proxy = ProxyServer::parse("http://cache.local:8080").unwrap();
        assert_eq!(proxy.port(), 8080);

        assert!(ProxyServer::parse("cache.local:no").is_err());
        assert!(ProxyServer::parse(":3128").is_err());
    }
}
