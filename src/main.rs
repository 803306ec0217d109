use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use stampede::{Credentials, Plan, ProxyServer, Reporter, RunConfig, Runner, Target};

/// An HTTP/HTTPS load generator.
#[derive(Parser, Debug)]
#[command(name = "stampede", version, about)]
struct Cli {
    /// URLs to strike; read from --file when omitted
    #[arg(required_unless_present = "file")]
    urls: Vec<String>,

    /// Number of concurrent simulated clients
    #[arg(short, long, default_value_t = 10)]
    concurrent: usize,

    /// Plan iterations per client
    #[arg(short, long)]
    reps: Option<usize>,

    /// Run for a fixed duration instead (e.g. 30s, 5m, 1h)
    #[arg(short, long, value_parser = humantime::parse_duration)]
    time: Option<Duration>,

    /// Pick URLs at random instead of in order
    #[arg(short, long)]
    internet: bool,

    /// File with one plan entry per line: URL [POST body]
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Max random think time before each request (e.g. 500ms, 3s)
    #[arg(short, long, value_parser = humantime::parse_duration)]
    delay: Option<Duration>,

    /// Send Connection: close and open a fresh socket per request
    #[arg(long)]
    no_keepalive: bool,

    /// Requests served per connection before it is recycled (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    connection_max: u32,

    /// Do not follow 301/302 answers
    #[arg(long)]
    no_follow: bool,

    /// Redirect chain depth treated as a failure
    #[arg(long, default_value_t = 10)]
    redirect_limit: usize,

    /// Authentication attempts per URL and challenge source
    #[arg(long, default_value_t = 3)]
    auth_bids: u32,

    /// Drop a client's cookies every time its plan wraps around
    #[arg(long)]
    expire_session: bool,

    /// Abort the run after this many failed transactions (0 = never)
    #[arg(long, default_value_t = 1024)]
    failures: u64,

    /// Socket read/write timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,

    /// Connection establishment timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    connect_timeout: Duration,

    /// Forward proxy, host:port or http://host:port
    #[arg(long)]
    proxy: Option<String>,

    /// WWW credentials, user:password
    #[arg(long)]
    user: Option<String>,

    /// Proxy credentials, user:password
    #[arg(long)]
    proxy_user: Option<String>,

    /// A URL fetched once per client before its main loop
    #[arg(long)]
    login_url: Option<String>,

    /// Override the User-Agent header
    #[arg(long)]
    agent: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Count zero-length response bodies as success
    #[arg(long)]
    zero_data_ok: bool,

    /// Seed the worker RNGs for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Print a line per transaction
    #[arg(short, long)]
    verbose: bool,

    /// Emit verbose lines as CSV records
    #[arg(long)]
    csv: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Prefix verbose lines with the wall time
    #[arg(long)]
    timestamp: bool,

    /// A string carried in every CSV record
    #[arg(long)]
    mark: Option<String>,

    /// Show full URLs instead of paths in verbose lines
    #[arg(long)]
    fullurl: bool,

    /// Show the client id in verbose lines
    #[arg(long)]
    show_id: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(clean) => {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("stampede: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> stampede::Result<bool> {
    let mut plan = match &cli.file {
        Some(path) => Plan::from_file(path)?,
        None => Plan::from_specs(&cli.urls)?,
    };
    if let Some(login) = &cli.login_url {
        let id = plan.len();
        plan = plan.with_login(Target::parse(login, id)?);
    }

    let mut builder = RunConfig::builder()
        .concurrency(cli.concurrent)
        .internet(cli.internet)
        .keepalive(!cli.no_keepalive)
        .connection_max(cli.connection_max)
        .follow_redirects(!cli.no_follow)
        .redirect_limit(cli.redirect_limit)
        .auth_bids(cli.auth_bids)
        .expire_cookies_on_wrap(cli.expire_session)
        .failure_budget(cli.failures)
        .socket_timeout(cli.timeout)
        .connect_timeout(cli.connect_timeout)
        .accept_invalid_certs(cli.insecure)
        .zero_ok(cli.zero_data_ok)
        .verbose(cli.verbose)
        .csv(cli.csv)
        .color(!cli.no_color && !cli.csv)
        .timestamp(cli.timestamp)
        .fullurl(cli.fullurl)
        .show_id(cli.show_id);

    match (cli.reps, cli.time) {
        (Some(reps), _) => builder = builder.reps(reps),
        (None, Some(_)) => {}
        (None, None) => builder = builder.reps(25),
    }
    if let Some(time) = cli.time {
        builder = builder.time_limit(time);
    }
    if let Some(delay) = cli.delay {
        builder = builder.delay_max(delay);
    }
    if let Some(proxy) = &cli.proxy {
        builder = builder.proxy(ProxyServer::parse(proxy)?);
    }
    if let Some(user) = &cli.user {
        builder = builder.credentials(Credentials::parse(user)?);
    }
    if let Some(user) = &cli.proxy_user {
        builder = builder.proxy_credentials(Credentials::parse(user)?);
    }
    if let Some(agent) = &cli.agent {
        builder = builder.user_agent(agent.clone());
    }
    if let Some(seed) = cli.seed {
        builder = builder.rng_seed(seed);
    }
    if let Some(mark) = &cli.mark {
        builder = builder.mark(mark.clone());
    }
    let config = builder.build()?;

    let runner = Runner::new(config.clone(), plan);
    let shutdown = runner.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let report = runner.run().await?;
    Reporter::new(&config).summary(&report);
    Ok(!report.aborted)
}
