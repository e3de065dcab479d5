mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use stampede::prelude::*;
    use std::sync::OnceLock;
    use std::time::Duration;

    static TARGET: OnceLock<String> = OnceLock::new();

    #[scenario]
    async fn canary() -> Result<reqwest::Response, reqwest::Error> {
        let url = TARGET.get().map(String::as_str).unwrap_or("http://127.0.0.1:65508");
        reqwest::get(url).await
    }

    #[scenario]
    async fn teapot() -> Result<u16, std::convert::Infallible> {
        Ok(418)
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(10_000)]
    async fn macro_builds_a_named_scenario() {
        init();
        let addr = mock().await;
        TARGET.get_or_init(|| format!("http://{addr}/"));

        let scenario = canary()
            .check("status is 200", |r| r.status() == 200)
            .pacing(Duration::from_millis(50));
        assert_eq!(scenario.name(), "canary");

        let profile = RunProfile::builder()
            .stage(Duration::from_millis(100), 2)
            .stage(Duration::from_millis(300), 2)
            .threshold("checks", "rate==1")
            .tick(Duration::from_millis(20))
            .build()
            .unwrap();

        let summary = run(profile, scenario).await;
        assert_eq!(summary.name, "canary");
        assert_eq!(summary.exit_code(), 0, "{summary}");
    }

    #[tokio::test]
    async fn non_http_responses_use_their_status() {
        let profile = RunProfile::builder()
            .stage(Duration::ZERO, 1)
            .stage(Duration::from_millis(100), 1)
            .tick(Duration::from_millis(20))
            .build()
            .unwrap();

        let scenario = teapot().pacing(Duration::from_millis(10));
        let summary = run(profile, scenario).await;
        assert!(summary.requests > 0);
        assert_eq!(summary.failed_requests, summary.requests);
    }
}
