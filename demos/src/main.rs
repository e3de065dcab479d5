//! Canary check against a local service.
//!
//! ```sh
//! cargo run -p mock-service &
//! cargo run -p demos --bin canary [demos/canary.json]
//! ```
use stampede::prelude::*;
use stampede::EXIT_INVALID_CONFIG;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    FmtSubscriber::builder()
        .with_env_filter("stampede=info")
        .init();

    let profile = match std::env::args().nth(1) {
        Some(path) => RunProfile::from_path(&path),
        None => RunProfile::builder()
            .stage(Duration::from_secs(30), 10)
            .stage(Duration::from_secs(60), 10)
            .stage(Duration::from_secs(10), 0)
            .threshold("http_req_duration", "p(95)<500")
            .build(),
    };
    let profile = match profile {
        Ok(profile) => profile,
        Err(err) => {
            error!("Invalid profile: {err}");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    };

    let scenario = canary()
        .check("status is 200", |r| r.status() == 200)
        .pacing(Duration::from_secs(1));

    let runner = Runner::new(profile, scenario);
    let handle = runner.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping virtual users.");
            handle.abort();
        }
    });

    let summary = runner.run().await;
    println!("{summary}");
    std::process::exit(summary.exit_code());
}

#[scenario]
async fn canary() -> Result<reqwest::Response, reqwest::Error> {
    reqwest::get("http://127.0.0.1:65508").await
}
