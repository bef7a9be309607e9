#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use pipeline_webhook::{DerivedValue, EventData, PipelineEvent, RunMetadata, Step};

/// One request seen by a [`Recorder`].
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: Method,
    pub path: String,
    pub body: Vec<u8>,
}

impl Hit {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct RecorderState {
    hits: Arc<Mutex<Vec<Hit>>>,
    status: StatusCode,
    delay: Duration,
}

/// Local HTTP listener that records every request and answers with a fixed
/// status.
pub struct Recorder {
    base_url: String,
    hits: Arc<Mutex<Vec<Hit>>>,
    _task: JoinHandle<()>,
}

impl Recorder {
    pub async fn start() -> Self {
        Self::start_with_status(StatusCode::OK).await
    }

    pub async fn start_with_status(status: StatusCode) -> Self {
        Self::spawn(status, Duration::ZERO).await
    }

    /// Records each request on arrival but holds the response for `delay`.
    pub async fn start_stalled(delay: Duration) -> Self {
        Self::spawn(StatusCode::OK, delay).await
    }

    async fn spawn(status: StatusCode, delay: Duration) -> Self {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let state = RecorderState {
            hits: hits.clone(),
            status,
            delay,
        };
        let app = Router::new().fallback(record).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
            _task: task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self, path: &str) -> Vec<Hit> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|hit| hit.path == path)
            .cloned()
            .collect()
    }

    /// Poll until `path` has seen at least `count` requests.
    pub async fn wait_for(&self, path: &str, count: usize) -> Vec<Hit> {
        for _ in 0..100 {
            let hits = self.hits(path);
            if hits.len() >= count {
                return hits;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.hits(path)
    }
}

async fn record(State(state): State<RecorderState>, method: Method, uri: Uri, body: Bytes) -> StatusCode {
    state.hits.lock().unwrap().push(Hit {
        method,
        path: uri.path().to_string(),
        body: body.to_vec(),
    });
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.status
}

/// Two-step run: the first step carries `args`, the second forwards to
/// `next_url`.
pub fn two_step_event(
    run_id: &str,
    value: impl Into<DerivedValue>,
    args: &str,
    next_url: &str,
    error_url: &str,
) -> PipelineEvent {
    PipelineEvent::new(
        EventData::new()
            .with_raw("Test")
            .with_event_type("Test")
            .with_category("Test")
            .with_derived("fieldname", value),
        RunMetadata::new(
            run_id,
            vec![
                Step::new("Command 1", args, "http://127.0.0.1:9/query"),
                Step::new("Command 2", "args 2", next_url),
            ],
        )
        .with_error_url(error_url),
    )
}
