//! Common test utilities for in-process API testing.
//!
//! The fixture builds the real router on top of a temporary SQLite database.
//! No tracking worker runs, so queued jobs stay put and tests can inspect
//! them through the queue handle.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use waybill_core::{
    Config, DatabaseConfig, JobScheduler, ServerConfig, ShipmentStore, SqliteJobQueue,
    SqliteShipmentStore, TrackingConfig, TrackingService,
};

/// Test fixture for API testing against a temporary database.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Shipment store behind the router
    pub store: Arc<SqliteShipmentStore>,
    /// Job queue behind the router
    pub queue: Arc<SqliteJobQueue>,
    /// Temporary directory holding the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default tracking settings.
    pub async fn new() -> Self {
        Self::with_tracking(TrackingConfig {
            enabled: false,
            ..Default::default()
        })
        .await
    }

    /// Create a test fixture with custom tracking settings.
    pub async fn with_tracking(tracking: TrackingConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            tracking,
        };

        let store = Arc::new(
            SqliteShipmentStore::new(&db_path).expect("Failed to create shipment store"),
        );
        let queue = Arc::new(
            SqliteJobQueue::new(&db_path)
                .expect("Failed to create job queue")
                .with_max_attempts(config.tracking.max_attempts),
        );

        let tracking = Arc::new(TrackingService::new(
            Arc::clone(&store) as Arc<dyn ShipmentStore>,
            Arc::clone(&queue) as Arc<dyn JobScheduler>,
            config.tracking.clone(),
        ));

        let state = Arc::new(waybill_server::state::AppState::new(
            config,
            Arc::clone(&store) as Arc<dyn ShipmentStore>,
            Arc::clone(&queue),
            tracking,
            None, // No worker, jobs stay queued
        ));

        let router = waybill_server::api::create_router(state);

        Self {
            router,
            store,
            queue,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        self.send(request).await
    }

    /// Fetch the raw text of an endpoint (for non-JSON responses).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
