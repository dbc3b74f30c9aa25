//! Background-refreshed cache of oracle gas price recommendations

use super::price::{GasPrice, GasPriority, OracleResponse};
use crate::config::GasStationConfig;
use crate::error::{ClientError, ClientResult};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// All tiers from one successful oracle fetch
#[derive(Debug, Clone)]
pub struct GasSnapshot {
    prices: HashMap<GasPriority, GasPrice>,
    refreshed_at: Instant,
    fetched_at: DateTime<Utc>,
}

impl GasSnapshot {
    fn new(prices: HashMap<GasPriority, GasPrice>) -> Self {
        Self {
            prices,
            refreshed_at: Instant::now(),
            fetched_at: Utc::now(),
        }
    }

    pub fn price(&self, priority: GasPriority) -> Option<GasPrice> {
        self.prices.get(&priority).copied()
    }

    /// Time since this snapshot was fetched
    pub fn age(&self) -> Duration {
        self.refreshed_at.elapsed()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Fetches and parses the oracle endpoint
struct OracleFetcher {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl OracleFetcher {
    fn new(config: &GasStationConfig) -> ClientResult<Self> {
        let url = reqwest::Url::parse(&config.endpoint_url).map_err(|e| {
            ClientError::Config(format!(
                "Invalid gas station endpoint {}: {}",
                config.endpoint_url, e
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, url })
    }

    async fn fetch(&self) -> ClientResult<GasSnapshot> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::network("fetch gas prices", e))?;

        let body: OracleResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Oracle(format!("failed to parse gas prices: {}", e)))?;

        let snapshot = GasSnapshot::new(body.into_prices()?);
        for (priority, price) in &snapshot.prices {
            crate::metrics::record_gas_price(priority.label(), price.as_gwei_f64());
        }
        Ok(snapshot)
    }
}

/// Gas price oracle cache refreshed on a timer.
///
/// Readers never wait on the network: `estimate` clones the current
/// snapshot under a momentary borrow of a watch channel, while the refresh
/// task replaces it wholesale. A failed refresh keeps serving the previous
/// snapshot.
pub struct GasStation {
    snapshot: watch::Receiver<Arc<GasSnapshot>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GasStation {
    /// Fetch once and start refreshing. Fails if the first fetch fails.
    pub async fn new(config: GasStationConfig) -> ClientResult<Self> {
        if config.refresh_interval().is_zero() {
            return Err(ClientError::Config(
                "Gas station refresh interval must be positive".to_string(),
            ));
        }

        let fetcher = OracleFetcher::new(&config)?;
        let initial = fetcher.fetch().await.map_err(|e| {
            ClientError::Oracle(format!("initial fetch from {} failed: {}", fetcher.url, e))
        })?;
        crate::metrics::record_gas_refresh(true);

        let (publisher, snapshot) = watch::channel(Arc::new(initial));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(refresh_loop(
            fetcher,
            publisher,
            config.refresh_interval(),
            shutdown.clone(),
        ));

        info!(
            "Gas station started for {} (refresh every {:?})",
            config.endpoint_url,
            config.refresh_interval()
        );
        Ok(Self {
            snapshot,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Cached price for `priority` and the time since the last successful
    /// refresh. A tier the oracle did not report reads as zero.
    pub fn estimate(&self, priority: GasPriority) -> (GasPrice, Duration) {
        let snapshot = self.snapshot();
        (
            snapshot.price(priority).unwrap_or(GasPrice::ZERO),
            snapshot.age(),
        )
    }

    /// Cached price for `priority`, `None` if the oracle did not report it
    pub fn quote(&self, priority: GasPriority) -> Option<GasPrice> {
        self.snapshot().price(priority)
    }

    pub fn snapshot(&self) -> Arc<GasSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop refreshing and wait for the background task to exit.
    /// The last snapshot stays readable.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Gas station refresh task ended abnormally: {}", e);
            }
            info!("Gas station stopped");
        }
    }
}

impl Drop for GasStation {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn refresh_loop(
    fetcher: OracleFetcher,
    publisher: watch::Sender<Arc<GasSnapshot>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = fetcher.fetch() => result,
        };

        match result {
            Ok(snapshot) => {
                publisher.send_replace(Arc::new(snapshot));
                crate::metrics::record_gas_refresh(true);
                debug!("Gas prices refreshed from {}", fetcher.url);
            }
            Err(e) => {
                crate::metrics::record_gas_refresh(false);
                warn!("Gas price refresh failed, keeping previous prices: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;

    /// Oracle double whose response can be swapped or broken mid-test
    #[derive(Clone, Default)]
    struct FakeOracle {
        body: Arc<StdMutex<Option<Value>>>,
        hits: Arc<StdMutex<u32>>,
    }

    impl FakeOracle {
        fn respond(&self, body: Option<Value>) {
            *self.body.lock().unwrap() = body;
        }

        fn hits(&self) -> u32 {
            *self.hits.lock().unwrap()
        }
    }

    async fn serve_prices(State(oracle): State<FakeOracle>) -> Result<Json<Value>, StatusCode> {
        *oracle.hits.lock().unwrap() += 1;
        oracle
            .body
            .lock()
            .unwrap()
            .clone()
            .map(Json)
            .ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    async fn start_oracle(body: Option<Value>) -> (FakeOracle, String) {
        let oracle = FakeOracle::default();
        oracle.respond(body);

        let app = Router::new()
            .route("/json/ethgasAPI.json", get(serve_prices))
            .with_state(oracle.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (oracle, format!("http://{}/json/ethgasAPI.json", addr))
    }

    fn config(url: &str, refresh: Duration) -> GasStationConfig {
        GasStationConfig {
            request_timeout_ms: 1_000,
            ..GasStationConfig::new(url, refresh)
        }
    }

    fn sample() -> Option<Value> {
        Some(json!({"low": 10, "fast": 50, "fastest": 100}))
    }

    #[tokio::test]
    async fn test_initial_fetch_seeds_estimates() {
        let (_oracle, url) = start_oracle(sample()).await;
        let station = GasStation::new(config(&url, Duration::from_secs(60)))
            .await
            .unwrap();

        let (fast, age) = station.estimate(GasPriority::Fast);
        assert_eq!(fast.to_gwei_string(), "5.0");
        assert!(age < Duration::from_secs(1));

        let (low, _) = station.estimate(GasPriority::SafeLow);
        assert_eq!(low, GasPrice::from_gwei(1));
        assert_eq!(station.estimate(GasPriority::Average).0, GasPrice::ZERO);
        assert!(station.quote(GasPriority::Average).is_none());

        station.stop().await;
        assert!(!station.is_running());
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_is_fatal() {
        let (_oracle, url) = start_oracle(None).await;
        let err = GasStation::new(config(&url, Duration::from_secs(60)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Oracle(_)));
    }

    #[tokio::test]
    async fn test_refresh_replaces_all_tiers() {
        let (oracle, url) = start_oracle(sample()).await;
        let station = GasStation::new(config(&url, Duration::from_millis(50)))
            .await
            .unwrap();

        oracle.respond(Some(json!({"low": 20, "fast": 70, "fastest": 150})));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let snapshot = station.snapshot();
        assert_eq!(snapshot.price(GasPriority::SafeLow), Some(GasPrice::from_gwei(2)));
        assert_eq!(snapshot.price(GasPriority::Fast), Some(GasPrice::from_gwei(7)));
        assert_eq!(
            snapshot.price(GasPriority::Fastest).unwrap().to_gwei_string(),
            "15.0"
        );
        station.stop().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_prices() {
        let (oracle, url) = start_oracle(sample()).await;
        let station = GasStation::new(config(&url, Duration::from_millis(50)))
            .await
            .unwrap();

        oracle.respond(None);
        let hits_before = oracle.hits();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(oracle.hits() > hits_before, "refresh kept polling");

        let (fast, age) = station.estimate(GasPriority::Fast);
        assert_eq!(fast.to_gwei_string(), "5.0");
        // Age counts from the last successful fetch, not the failed attempts
        assert!(age >= Duration::from_millis(400));
        station.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let (oracle, url) = start_oracle(sample()).await;
        let station = GasStation::new(config(&url, Duration::from_millis(20)))
            .await
            .unwrap();

        station.stop().await;
        let hits = oracle.hits();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(oracle.hits(), hits);
        // Stopping twice is harmless
        station.stop().await;
        assert_eq!(station.estimate(GasPriority::Fast).0, GasPrice::from_gwei(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_estimate_does_not_block_during_refresh() {
        let (_oracle, url) = start_oracle(sample()).await;
        let station = Arc::new(
            GasStation::new(config(&url, Duration::from_millis(1)))
                .await
                .unwrap(),
        );

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let station = station.clone();
                tokio::spawn(async move {
                    let mut slowest = Duration::ZERO;
                    for _ in 0..2_000 {
                        let started = std::time::Instant::now();
                        let (price, _) = station.estimate(GasPriority::Fastest);
                        slowest = slowest.max(started.elapsed());
                        assert_eq!(price, GasPrice::from_gwei(10));
                    }
                    slowest
                })
            })
            .collect();

        for reader in readers {
            let slowest = reader.await.unwrap();
            assert!(slowest < Duration::from_millis(50), "estimate took {:?}", slowest);
        }
        station.stop().await;
    }
}
