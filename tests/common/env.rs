//! Test environment: mock source server, temp staging directory, in-memory bucket

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tripdata_sync::{
    Config, DatasetConfig, Event, MemoryBlobStore, MemoryRepository, Orchestrator, RetryConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Destination bucket used by every test
pub const BUCKET: &str = "nyc-tlc-test";

/// Source mock, staging directory and destination for one test
pub struct TestEnv {
    /// Serves `/{category}/{file_name}`
    pub server: MockServer,
    /// Holds the staging directory
    pub dir: TempDir,
    /// Destination buckets
    pub repository: MemoryRepository,
}

impl TestEnv {
    /// Start a mock server and create an empty temp directory
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            repository: MemoryRepository::new(),
        }
    }

    /// Yellow taxi files for 2019 and the given months, 3 download attempts
    pub fn config(&self, months: &[u32]) -> Config {
        let mut config = Config::default();
        config.catalog.datasets = vec![DatasetConfig::with_base_url("yellow", self.server.uri())];
        config.catalog.years = vec![2019];
        config.catalog.months = months.to_vec();
        config.staging.download_dir = self.staging_dir();
        config.destination.bucket = BUCKET.to_string();
        config.retry = fast_retry(3);
        config
    }

    /// Staging directory inside the temp dir
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("nyc_taxi_csv_gz")
    }

    /// Staged path of a 2019 yellow file
    pub fn staged(&self, month: u32) -> PathBuf {
        self.staging_dir().join(file_name(month))
    }

    /// Build an orchestrator writing into this environment's repository
    pub fn orchestrator(&self, config: Config) -> Orchestrator {
        Orchestrator::new(config, Arc::new(self.repository.clone())).expect("valid config")
    }

    /// The destination bucket (created by a run)
    pub fn bucket(&self) -> MemoryBlobStore {
        self.repository.bucket(BUCKET).expect("bucket exists")
    }

    /// Serve `body` for a month, expecting exactly `requests` requests
    pub async fn serve(&self, month: u32, body: &[u8], requests: u64) {
        Mock::given(method("GET"))
            .and(path(url_path(month)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .expect(requests)
            .mount(&self.server)
            .await;
    }

    /// Serve `body` for a month after `delay`
    pub async fn serve_slowly(&self, month: u32, body: &[u8], delay: Duration) {
        Mock::given(method("GET"))
            .and(path(url_path(month)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body.to_vec())
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer every request for a month with `status`, expecting `requests` of them
    pub async fn fail(&self, month: u32, status: u16, requests: u64) {
        Mock::given(method("GET"))
            .and(path(url_path(month)))
            .respond_with(ResponseTemplate::new(status))
            .expect(requests)
            .mount(&self.server)
            .await;
    }

    /// Answer the first `times` requests for a month with `status`
    pub async fn fail_first(&self, month: u32, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path(url_path(month)))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Number of requests the source received for a month
    pub async fn requests_for(&self, month: u32) -> usize {
        let wanted = url_path(month);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == wanted)
            .count()
    }
}

/// Staged file name of a 2019 yellow file
pub fn file_name(month: u32) -> String {
    format!("yellow_tripdata_2019-{:02}.csv.gz", month)
}

/// Destination key of a 2019 yellow file with the default layout
pub fn key(month: u32) -> String {
    format!("nyc_taxi/yellow/{}", file_name(month))
}

fn url_path(month: u32) -> String {
    format!("/yellow/{}", file_name(month))
}

/// Retry policy with millisecond delays
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
        jitter: false,
    }
}

/// Every event currently buffered on `rx`
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
