//! # stampede
//!
//! A multi-threaded HTTP/HTTPS load generator. N concurrent workers walk a
//! configured URL plan — optionally through a forward proxy — measuring
//! per-transaction latency, byte counts and response-code outcomes, and fold
//! everything into a run report. Workers answer Basic and Digest
//! authentication challenges, follow redirects, carry their own cookies, and
//! reuse connections when the server permits.
//!
//! The command-line binary covers the common case; the library exposes the
//! same machinery for embedding:
//!
//! ```rust,no_run
//! use stampede::{Plan, RunConfig, Runner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stampede::Error> {
//!     let plan = Plan::from_specs(["http://localhost:8080/"])?;
//!     let config = RunConfig::builder()
//!         .concurrency(25)
//!         .reps(100)
//!         .build()?;
//!     let report = Runner::new(config, plan).run().await?;
//!     println!("{} hits, {} failed", report.transactions, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! Each worker is strictly sequential and owns its connection, RNG, cookie
//! jar and authentication state; the only cross-worker state is the failure
//! counter and the latency watermarks, behind a single mutex. A run ends
//! when every worker finishes its repetitions, the wall-clock deadline
//! passes, the failure budget is spent, or the shutdown token fires.

pub use http::{Method, StatusCode};
pub use url::Url;

mod auth;
mod config;
mod connect;
mod cookie;
mod error;
mod plan;
mod report;
mod runner;
mod stats;
mod transaction;
mod wire;
mod worker;

pub use crate::auth::Credentials;
pub use crate::config::{ConfigBuilder, ProxyServer, RunConfig};
pub use crate::error::{Error, Result};
pub use crate::plan::{Plan, Scheme, Target};
pub use crate::report::Reporter;
pub use crate::runner::Runner;
pub use crate::stats::{RunReport, WorkerStats};

fn _assert_impls() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    assert_send::<RunConfig>();
    assert_sync::<RunConfig>();
    assert_send::<Plan>();
    assert_sync::<Plan>();
    assert_send::<Runner>();
    assert_send::<Error>();
    assert_sync::<Error>();
}
