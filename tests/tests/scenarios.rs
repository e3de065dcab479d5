mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use stampede::prelude::*;
    use stampede::{EXIT_EXTERNAL_ABORT, EXIT_THRESHOLDS_FAILED};
    use std::num::NonZeroU32;
    use std::time::Duration;

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// The canary shape, scaled down: ramp, hold, ramp down.
    fn short_canary() -> stampede::RunProfileBuilder {
        RunProfile::builder()
            .stage(millis(300), 5)
            .stage(millis(600), 5)
            .stage(millis(100), 0)
            .tick(millis(20))
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn healthy_endpoint_passes() {
        init();
        let addr = mock().await;

        let profile = short_canary()
            .threshold("http_req_duration", "p(95)<500")
            .threshold("http_req_failed", "rate<0.01")
            .threshold("checks", "rate>0.99")
            .build()
            .unwrap();
        let scenario = get(addr, "/")
            .check("status is 200", |r| r.status() == 200)
            .pacing(millis(50));

        let summary = run(profile, scenario).await;

        assert_eq!(summary.exit_code(), 0, "{summary}");
        assert_eq!(summary.vus_max, 5);
        assert!(summary.requests > 0);
        assert_eq!(summary.failed_requests, 0);
        assert_eq!(summary.check("status is 200").unwrap().passes, summary.requests);
        assert!(summary.latency.p95.is_some());
        assert!(summary.elapsed >= millis(1_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn server_errors_fail_thresholds() {
        init();
        let addr = mock().await;

        let profile = short_canary()
            .threshold("http_req_failed", "rate<0.01")
            .threshold("checks", "rate>0.99")
            .build()
            .unwrap();
        let scenario = get(addr, "/status/503")
            .check("status is 200", |r| r.status() == 200)
            .pacing(millis(50));

        let summary = run(profile, scenario).await;

        assert_eq!(summary.exit_code(), EXIT_THRESHOLDS_FAILED);
        assert!(!summary.aborted);
        assert!(summary.requests > 0);
        assert_eq!(summary.failed_requests, summary.requests);
        assert_eq!(summary.violations().count(), 2);

        let check = summary.check("status is 200").unwrap();
        assert_eq!(check.passes, 0);
        assert_eq!(check.fails, summary.requests);

        // Failures never cut the run short.
        assert!(summary.elapsed >= millis(1_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn in_flight_requests_complete_after_the_last_stage() {
        init();
        let addr = mock().await;

        let profile = RunProfile::builder()
            .stage(Duration::ZERO, 3)
            .stage(millis(200), 3)
            .tick(millis(20))
            .build()
            .unwrap();
        let scenario = get(addr, "/delay/ms/500").check("status is 200", |r| r.status() == 200);

        let summary = run(profile, scenario).await;

        // Every worker was mid-request when the last stage ended and got to finish it.
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.failed_requests, 0);
        assert_eq!(summary.iterations, 3);
        assert!(summary.elapsed >= millis(500));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn abort_reports_external_abort() {
        init();
        let addr = mock().await;

        let profile = RunProfile::builder()
            .stage(millis(100), 2)
            .stage(Duration::from_secs(30), 2)
            .tick(millis(20))
            .build()
            .unwrap();
        let runner = Runner::new(profile, get(addr, "/").pacing(millis(20)));
        let handle = runner.abort_handle();

        tokio::spawn(async move {
            tokio::time::sleep(millis(400)).await;
            handle.abort();
        });

        let summary = runner.run().await;
        assert!(summary.aborted);
        assert_eq!(summary.exit_code(), EXIT_EXTERNAL_ABORT);
        assert!(summary.elapsed < Duration::from_secs(5));
        assert!(summary.requests > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn unreachable_endpoint_is_counted_not_fatal() {
        init();
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let profile = RunProfile::builder()
            .stage(millis(300), 2)
            .threshold("http_req_failed", "rate<0.5")
            .tick(millis(20))
            .build()
            .unwrap();
        let scenario = get(addr, "/")
            .check("status is 200", |r| r.status() == 200)
            .pacing(millis(50))
            .timeout(Duration::from_secs(1));

        let summary = run(profile, scenario).await;

        assert!(summary.requests > 0);
        assert_eq!(summary.failed_requests, summary.requests);
        assert_eq!(summary.check("status is 200").unwrap().fails, summary.requests);
        assert_eq!(summary.exit_code(), EXIT_THRESHOLDS_FAILED);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn rate_cap_limits_throughput() {
        init();
        let addr = mock().await;

        let profile = RunProfile::builder()
            .stage(Duration::ZERO, 10)
            .stage(Duration::from_secs(1), 10)
            .max_rps(NonZeroU32::new(20).unwrap())
            .threshold("http_reqs", "count<=30")
            .tick(millis(20))
            .build()
            .unwrap();

        let summary = run(profile, get(addr, "/")).await;

        assert!(summary.requests >= 10, "{summary}");
        assert_eq!(summary.exit_code(), 0, "{summary}");
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn max_vus_caps_the_pool() {
        init();
        let addr = mock().await;

        let profile = RunProfile::builder()
            .stage(millis(200), 50)
            .stage(millis(200), 50)
            .max_vus(4)
            .threshold("vus_max", "value<=4")
            .tick(millis(20))
            .build()
            .unwrap();

        let summary = run(profile, get(addr, "/").pacing(millis(20))).await;
        assert_eq!(summary.vus_max, 4);
        assert_eq!(summary.exit_code(), 0, "{summary}");
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn profile_from_json() {
        init();
        let addr = mock().await;

        let profile = RunProfile::from_json(
            r#"{
                "stages": [
                    { "duration": "200ms", "target": 3 },
                    { "duration": "300ms", "target": 3 },
                    { "duration": "100ms", "target": 0 }
                ],
                "thresholds": {
                    "http_req_duration": ["p(95)<1s", "max<2000"],
                    "iterations": "count>0"
                },
                "tick": "20ms"
            }"#,
        )
        .unwrap();

        let summary = run(profile, get(addr, "/jitter/ms/10").pacing(millis(20))).await;
        assert_eq!(summary.thresholds.len(), 3);
        assert_eq!(summary.exit_code(), 0, "{summary}");
    }

    /// Full-length canary: 30s ramp to 10, one minute hold, 10s ramp down.
    #[cfg(feature = "integration")]
    #[tokio::test(flavor = "multi_thread")]
    async fn full_canary() {
        init();
        let addr = mock().await;

        let profile = RunProfile::builder()
            .stage(Duration::from_secs(30), 10)
            .stage(Duration::from_secs(60), 10)
            .stage(Duration::from_secs(10), 0)
            .threshold("http_req_duration", "p(95)<500")
            .build()
            .unwrap();
        let scenario = get(addr, "/jitter/ms/20")
            .check("status is 200", |r| r.status() == 200)
            .pacing(Duration::from_secs(1));

        let summary = run(profile, scenario).await;
        assert_eq!(summary.exit_code(), 0, "{summary}");
        assert_eq!(summary.vus_max, 10);
    }
}
