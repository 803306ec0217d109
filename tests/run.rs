mod support;

use std::time::Duration;

use support::server::{self, Reply};

use stampede::{Plan, RunConfig, Runner, Target};

#[tokio::test]
async fn sequential_get_without_reuse() {
    // Two URLs walked in order, four iterations, a fresh socket per request.
    let origin = server::scripted(|_| Reply::ok(b"0123456789"));

    let plan = Plan::from_specs([origin.url("/a"), origin.url("/b")]).unwrap();
    let config = RunConfig::builder()
        .reps(4)
        .keepalive(false)
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(report.bytes, 40);
    assert_eq!(origin.opens(), 4);
    assert_eq!(
        origin.request_lines(),
        vec!["GET /a", "GET /b", "GET /a", "GET /b"]
    );
}

#[tokio::test]
async fn keepalive_rides_one_connection() {
    let origin = server::scripted(|_| Reply::ok(b"body"));

    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder().reps(5).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 5);
    assert_eq!(origin.opens(), 1);
}

#[tokio::test]
async fn connection_max_recycles_the_socket() {
    // Five requests at two per connection means three opens: 2 + 2 + 1.
    let origin = server::scripted(|_| Reply::ok(b"body"));

    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder()
        .reps(5)
        .connection_max(2)
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(origin.opens(), 3);
}

#[tokio::test]
async fn connection_max_of_one_disables_reuse() {
    let origin = server::scripted(|_| Reply::ok(b"body"));

    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder()
        .reps(3)
        .connection_max(1)
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 3);
    assert_eq!(origin.opens(), 3);
}

#[tokio::test]
async fn server_errors_consume_the_failure_budget() {
    let origin = server::scripted(|_| Reply::status(500, "Internal Server Error", &[], b"oops"));

    let plan = Plan::from_specs([origin.url("/e")]).unwrap();
    let config = RunConfig::builder()
        .reps(3)
        .failure_budget(2)
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 0);
    assert_eq!(report.failed, 2);
    assert!(report.aborted);
    assert_eq!(origin.requests().len(), 2);
    // the 5xx answers were still classified
    assert_eq!(report.workers[0].code_fail, 2);
    assert_eq!(report.code_ok, 0);
}

#[tokio::test]
async fn other_4xx_counts_against_code_fail_but_not_the_budget() {
    let origin = server::scripted(|_| Reply::status(404, "Not Found", &[], b"missing"));

    let plan = Plan::from_specs([origin.url("/gone")]).unwrap();
    let config = RunConfig::builder().reps(3).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.workers[0].code_fail, 3);
    assert_eq!(report.ok200, 0);
}

#[tokio::test]
async fn zero_length_bodies_fail_unless_allowed() {
    let origin = server::scripted(|_| Reply::ok(b""));

    let plan = Plan::from_specs([origin.url("/empty")]).unwrap();
    let config = RunConfig::builder().reps(1).build().unwrap();
    let report = Runner::new(config, plan.clone()).run().await.unwrap();
    assert_eq!(report.transactions, 0);
    assert_eq!(report.failed, 1);

    let config = RunConfig::builder().reps(1).zero_ok(true).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();
    assert_eq!(report.transactions, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn chunked_bodies_count_entity_bytes_and_reuse() {
    let origin = server::scripted(|_| {
        Reply::raw(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
                .to_vec(),
        )
    });

    let plan = Plan::from_specs([origin.url("/chunked")]).unwrap();
    let config = RunConfig::builder().reps(2).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 2);
    assert_eq!(report.bytes, 18);
    assert_eq!(origin.opens(), 1);
}

#[tokio::test]
async fn slow_answers_trip_the_socket_timeout() {
    let origin =
        server::scripted(|_| Reply::ok(b"late").delayed(Duration::from_millis(600)));

    let plan = Plan::from_specs([origin.url("/slow")]).unwrap();
    let config = RunConfig::builder()
        .reps(1)
        .socket_timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 0);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn unsupported_protocols_fail_without_a_socket() {
    let plan = Plan::from_specs(["ftp://origin.invalid/pub"]).unwrap();
    let config = RunConfig::builder().reps(2).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 0);
    assert_eq!(report.failed, 2);
}

#[tokio::test]
async fn post_bodies_reach_the_wire() {
    let origin = server::scripted(|_| Reply::ok(b"stored"));

    let spec = format!("{} POST name=haha&pw=x", origin.url("/form"));
    let plan = Plan::from_specs([spec]).unwrap();
    let config = RunConfig::builder().reps(1).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 1);
    let requests = origin.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, "name=haha&pw=x");
    assert_eq!(
        requests[0].header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(requests[0].header("content-length"), Some("14"));
}

#[tokio::test]
async fn cookies_stick_to_the_session() {
    let origin = server::scripted(|received| {
        if received.path == "/set" {
            Reply::status(200, "OK", &[("Set-Cookie", "sid=abc123; Path=/")], b"set")
        } else {
            Reply::ok(b"checked")
        }
    });

    let plan = Plan::from_specs([origin.url("/set"), origin.url("/check")]).unwrap();
    let config = RunConfig::builder().reps(2).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.failed, 0);
    let requests = origin.requests();
    assert_eq!(requests[0].header("cookie"), None);
    assert_eq!(requests[1].header("cookie"), Some("sid=abc123"));
}

#[tokio::test]
async fn wrapping_the_plan_can_expire_the_session() {
    let respond = |received: &server::Received| {
        let _ = received;
        Reply::status(200, "OK", &[("Set-Cookie", "sid=abc123")], b"ok")
    };

    // Without the expiry flag the cookie survives the wrap.
    let origin = server::scripted(respond);
    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder().reps(2).build().unwrap();
    Runner::new(config, plan).run().await.unwrap();
    assert_eq!(origin.requests()[1].header("cookie"), Some("sid=abc123"));

    // With it, every wrap starts from a clean slate.
    let origin = server::scripted(respond);
    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder()
        .reps(2)
        .expire_cookies_on_wrap(true)
        .build()
        .unwrap();
    Runner::new(config, plan).run().await.unwrap();
    assert_eq!(origin.requests()[1].header("cookie"), None);
}

#[tokio::test]
async fn login_target_runs_once_before_the_loop() {
    let origin = server::scripted(|_| Reply::ok(b"ok"));

    let plan = Plan::from_specs([origin.url("/a")])
        .unwrap()
        .with_login(Target::parse(&origin.url("/login"), 1).unwrap());
    let config = RunConfig::builder().reps(2).build().unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(
        origin.request_lines(),
        vec!["GET /login", "GET /a", "GET /a"]
    );
    assert_eq!(report.transactions, 3);
}

#[tokio::test]
async fn internet_mode_draws_from_the_whole_plan() {
    let origin = server::scripted(|_| Reply::ok(b"ok"));

    let plan = Plan::from_specs([
        origin.url("/a"),
        origin.url("/b"),
        origin.url("/c"),
    ])
    .unwrap();
    let config = RunConfig::builder()
        .reps(50)
        .internet(true)
        .rng_seed(7)
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 50);
    let lines = origin.request_lines();
    assert_eq!(lines.len(), 50);
    assert!(lines
        .iter()
        .all(|line| ["GET /a", "GET /b", "GET /c"].contains(&line.as_str())));
}

#[tokio::test]
async fn deadline_bounds_the_run_when_reps_are_unset() {
    let origin = server::scripted(|_| Reply::ok(b"ok"));

    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder()
        .time_limit(Duration::from_millis(300))
        .delay_max(Duration::from_millis(10))
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert!(report.transactions >= 1);
    assert_eq!(report.failed, 0);
    assert!(report.elapsed >= Duration::from_millis(300));
    assert!(report.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn workers_fold_into_the_report() {
    let origin = server::scripted(|_| Reply::ok(b"0123456789"));

    let plan = Plan::from_specs([origin.url("/a")]).unwrap();
    let config = RunConfig::builder()
        .concurrency(4)
        .reps(3)
        .build()
        .unwrap();
    let report = Runner::new(config, plan).run().await.unwrap();

    assert_eq!(report.transactions, 12);
    assert_eq!(report.bytes, 120);
    assert_eq!(report.workers.len(), 4);
    assert!(report.workers.iter().all(|w| w.hits == 3));
    assert!(report.shortest <= report.longest);
    assert!(report
        .workers
        .iter()
        .all(|w| w.shortest.unwrap() >= report.shortest && w.longest <= report.longest));
}
