use reqwest::Client;
use stampede::Scenario;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!("Panic occurred: {info:?}");
            default_panic(info);
        }));

        let _ = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("stampede=debug,mock_service=info")
            .with_test_writer()
            .try_init();
    });
}

/// Start a mock service for the current test's runtime.
#[allow(unused)]
pub async fn mock() -> SocketAddr {
    mock_service::spawn()
        .await
        .expect("mock service failed to bind")
}

/// Scenario issuing a `GET` against the mock service.
#[allow(unused)]
pub fn get(addr: SocketAddr, path: &str) -> Scenario<reqwest::Response> {
    let client = Client::new();
    let url = format!("http://{addr}{path}");
    Scenario::new(path, move || client.get(&url).send())
}
