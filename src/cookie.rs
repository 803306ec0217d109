//! Per-worker HTTP cookie storage.
//!
//! Each simulated client keeps its own session: jars are slots in one shared
//! registry, keyed by worker id, so no cookie ever leaks between workers.

use std::fmt;
use std::sync::RwLock;

use bytes::Bytes;
use cookie_crate::Cookie as RawCookie;
use cookie_store::CookieStore;
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use url::Url;

pub(crate) struct CookieRegistry {
    jars: Vec<RwLock<CookieStore>>,
}

impl CookieRegistry {
    /// One empty jar per worker.
    pub(crate) fn new(workers: usize) -> CookieRegistry {
        CookieRegistry {
            jars: (0..workers).map(|_| RwLock::new(CookieStore::default())).collect(),
        }
    }

    /// The `Cookie` header for a request, if the worker's jar has matches.
    pub(crate) fn header_for(&self, worker: usize, url: &Url) -> Option<HeaderValue> {
        let jar = self.jars[worker].read().unwrap();
        let value = jar
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        if value.is_empty() {
            return None;
        }
        HeaderValue::from_maybe_shared(Bytes::from(value)).ok()
    }

    /// Store the `Set-Cookie` values of a response.
    pub(crate) fn ingest(&self, worker: usize, headers: &HeaderMap, url: &Url) {
        let cookies = headers.get_all(SET_COOKIE).iter().filter_map(|value| {
            std::str::from_utf8(value.as_bytes())
                .ok()
                .and_then(|text| RawCookie::parse(text).ok())
                .map(RawCookie::into_owned)
        });
        self.jars[worker]
            .write()
            .unwrap()
            .store_response_cookies(cookies, url);
    }

    /// Wipe a worker's session, e.g. when its plan cursor wraps.
    pub(crate) fn clear(&self, worker: usize) {
        *self.jars[worker].write().unwrap() = CookieStore::default();
    }
}

impl fmt::Debug for CookieRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CookieRegistry")
            .field("workers", &self.jars.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn round_trips_a_session_cookie() {
        let registry = CookieRegistry::new(1);
        let url: Url = "http://origin.local/a".parse().unwrap();

        assert!(registry.header_for(0, &url).is_none());
        registry.ingest(0, &set_cookie("sid=abc123; Path=/"), &url);
        let header = registry.header_for(0, &url).unwrap();
        assert_eq!(header.as_bytes(), b"sid=abc123");
    }

    #[test]
    fn jars_are_isolated_per_worker() {
        let registry = CookieRegistry::new(2);
        let url: Url = "http://origin.local/".parse().unwrap();

        registry.ingest(0, &set_cookie("sid=one"), &url);
        assert!(registry.header_for(0, &url).is_some());
        assert!(registry.header_for(1, &url).is_none());
    }

    #[test]
    fn clear_empties_only_that_worker() {
        let registry = CookieRegistry::new(2);
        let url: Url = "http://origin.local/".parse().unwrap();

        registry.ingest(0, &set_cookie("sid=one"), &url);
        registry.ingest(1, &set_cookie("sid=two"), &url);
        registry.clear(0);
        assert!(registry.header_for(0, &url).is_none());
        assert!(registry.header_for(1, &url).is_some());
    }

    #[test]
    fn joins_multiple_cookies() {
        let registry = CookieRegistry::new(1);
        let url: Url = "http://origin.local/".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        registry.ingest(0, &headers, &url);

        let header = registry.header_for(0, &url).unwrap();
        let text = std::str::from_utf8(header.as_bytes()).unwrap();
        assert!(text.contains("a=1") && text.contains("b=2"));
    }
}
