use axum::{debug_handler, extract::Path, http::StatusCode, routing::get, Router};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use metrics::counter;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
#[allow(unused)]
use tracing::{debug, error, info};

pub fn router() -> Router {
    Router::new()
        .route("/", get(ok))
        .route("/status/:code", get(status))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/jitter/ms/:mean_ms", get(jitter))
        .route("/limited/:max_rps", get(limited))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router()).await?;
    Ok(())
}

/// Serve on an ephemeral localhost port in the background.
pub async fn spawn() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router()).await {
            error!("Mock service stopped: {err}");
        }
    });
    Ok(addr)
}

fn hit() {
    counter!("mock_service.requests").increment(1);
    RPS_MEASURE.fetch_add(1, Ordering::Relaxed);
}

#[debug_handler]
pub async fn ok() -> &'static str {
    hit();
    "ok"
}

#[debug_handler]
pub async fn status(Path(code): Path<u16>) -> StatusCode {
    hit();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) {
    hit();
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Normally distributed delay with a standard deviation of a fifth of the mean.
#[debug_handler]
pub async fn jitter(Path(mean_ms): Path<u64>) -> Result<(), StatusCode> {
    hit();
    let mean = mean_ms as f64;
    let normal = Normal::new(mean, mean / 5.).map_err(|_| StatusCode::BAD_REQUEST)?;
    let sample = normal.sample(&mut rand::thread_rng()).max(0.);
    tokio::time::sleep(Duration::from_secs_f64(sample / 1e3)).await;
    Ok(())
}

lazy_static! {
    static ref LIMITERS: RwLock<HashMap<u32, Arc<DefaultDirectRateLimiter>>> =
        RwLock::new(HashMap::new());
}

/// Answers `429` once more than `max_rps` requests arrive within a second.
#[debug_handler]
pub async fn limited(Path(max_rps): Path<u32>) -> StatusCode {
    hit();
    let Some(rps) = NonZeroU32::new(max_rps) else {
        return StatusCode::TOO_MANY_REQUESTS;
    };

    let existing = LIMITERS
        .read()
        .ok()
        .and_then(|map| map.get(&max_rps).cloned());
    let limiter = match existing {
        Some(limiter) => limiter,
        None => {
            let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));
            if let Ok(mut map) = LIMITERS.write() {
                map.entry(max_rps).or_insert_with(|| limiter.clone()).clone()
            } else {
                limiter
            }
        }
    };

    match limiter.check() {
        Ok(_) => StatusCode::OK,
        Err(_) => {
            debug!("Rejecting request over {max_rps} rps");
            StatusCode::TOO_MANY_REQUESTS
        }
    }
}

/** RPS Printer **/

static RPS_MEASURE: AtomicU64 = AtomicU64::new(0);

pub async fn rps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let requests = RPS_MEASURE.swap(0, Ordering::Relaxed);
        info!("{requests} RPS");
    }
}
