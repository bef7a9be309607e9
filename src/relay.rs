use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use tracing::{debug, error, info, warn};

use crate::dispatcher::DispatcherConfig;
use crate::error::{ForwardOutcome, RelayError, TransportError};
use crate::types::{ErrorReport, PipelineEvent};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Outbound HTTP for callbacks, forwards, and error reports.
///
/// Retries are immediate and fixed in number. Only an HTTP 200 counts as
/// success.
pub struct Relay {
    client: reqwest::Client,
    request_timeout: Duration,
    callback_attempts: u32,
    forward_attempts: u32,
    error_report_attempts: u32,
}

impl Relay {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout: config.request_timeout,
            callback_attempts: config.callback_attempts,
            forward_attempts: config.forward_attempts,
            error_report_attempts: config.error_report_attempts,
        }
    }

    /// Trigger a callback with a bare GET.
    pub async fn invoke_callback(&self, url: &str) -> Result<(), RelayError> {
        self.send_with_attempts(self.callback_attempts, url, || self.client.get(url))
            .await
    }

    /// Move `event` to its next step and deliver it there.
    ///
    /// Failures are reported to the run's error URL rather than returned.
    pub async fn forward(&self, mut event: PipelineEvent) -> ForwardOutcome {
        let Some(target) = event.advance().map(|step| step.url.clone()) else {
            info!(
                run_id = %event.run.run_id,
                step = event.run.step,
                "run has no further steps, nothing to forward"
            );
            return ForwardOutcome::Completed;
        };

        match self.post_event(&target, &event).await {
            Ok(()) => {
                debug!(run_id = %event.run.run_id, step = event.run.step, url = %target, "event forwarded");
                metric_inc("webhook.forward.delivered");
                ForwardOutcome::Delivered
            }
            Err(err) => {
                error!(run_id = %event.run.run_id, step = event.run.step, url = %target, error = %err, "failed to forward event");
                metric_inc("webhook.forward.failed");
                let message = match &err {
                    RelayError::Serialization(_) => err.to_string(),
                    RelayError::Exhausted { .. } => format!("Failed to forward event: {err}"),
                };
                self.report_error(&event, &message, &format!("{err:?}")).await;
                ForwardOutcome::Failed
            }
        }
    }

    /// Post an [`ErrorReport`] to the run's error URL.
    ///
    /// Best-effort: failures are logged and dropped.
    pub async fn report_error(&self, event: &PipelineEvent, error_msg: &str, debug_msg: &str) {
        let url = event.run.error_url.as_str();
        if url.is_empty() {
            warn!(run_id = %event.run.run_id, error = error_msg, "run has no error url, cannot report failure");
            return;
        }

        let report = ErrorReport::new(event, error_msg, debug_msg);
        let body = match serde_json::to_vec(&report) {
            Ok(body) => body,
            Err(err) => {
                error!(run_id = %event.run.run_id, error = %err, "failed to serialise error report");
                return;
            }
        };

        let result = self
            .send_with_attempts(self.error_report_attempts, url, || self.post_json(url, body.clone()))
            .await;
        match result {
            Ok(()) => metric_inc("webhook.error_report.sent"),
            Err(err) => {
                error!(run_id = %event.run.run_id, url, error = %err, "failed to report error");
                metric_inc("webhook.error_report.failed");
            }
        }
    }

    async fn post_event(&self, url: &str, event: &PipelineEvent) -> Result<(), RelayError> {
        let body = serde_json::to_vec(event)?;
        self.send_with_attempts(self.forward_attempts, url, || self.post_json(url, body.clone()))
            .await
    }

    fn post_json(&self, url: &str, body: Vec<u8>) -> RequestBuilder {
        self.client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
    }

    async fn send_with_attempts<F>(&self, attempts: u32, url: &str, build: F) -> Result<(), RelayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send(build()).await {
                Ok(()) => return Ok(()),
                Err(last) if attempt >= attempts => {
                    return Err(RelayError::Exhausted { attempts, last });
                }
                Err(err) => {
                    warn!(url, attempt, error = %err, "outbound request failed, retrying");
                    attempt += 1;
                }
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), TransportError> {
        match request.timeout(self.request_timeout).send().await {
            Ok(response) if response.status() == StatusCode::OK => Ok(()),
            Ok(response) => Err(TransportError::Status(response.status().as_u16())),
            Err(err) if err.is_timeout() => Err(TransportError::Timeout),
            Err(err) => Err(TransportError::Network(err.to_string())),
        }
    }
}
