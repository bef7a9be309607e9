use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::condition::Condition;
use crate::drain::TaskSupervisor;
use crate::error::DispatchOutcome;
use crate::relay::Relay;
use crate::storage::{DedupStore, InMemoryStore};
use crate::types::PipelineEvent;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Total GET attempts made against a callback.
    pub callback_attempts: u32,
    /// Total POST attempts made when forwarding to the next step.
    pub forward_attempts: u32,
    /// Total POST attempts made when reporting a failure.
    pub error_report_attempts: u32,
    /// Upper bound on a single outbound attempt.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight forwards.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            callback_attempts: 4,
            forward_attempts: 3,
            error_report_attempts: 1,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Evaluates a step's condition, fires its callback at most once per run,
/// and always forwards the event to the next step.
///
/// Cloning is cheap; clones share the store and the in-flight accounting.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn DedupStore>,
    relay: Arc<Relay>,
    supervisor: TaskSupervisor,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: DispatcherConfig, store: Arc<dyn DedupStore>) -> Self {
        Self {
            store,
            relay: Arc::new(Relay::new(&config)),
            supervisor: TaskSupervisor::new(),
            config,
        }
    }

    /// Process one inbound event.
    ///
    /// Dispatch and the forward that follows it run together as one
    /// supervised task, so dropping the returned future (a caller that hangs
    /// up, say) loses neither. The returned future resolves with the callback
    /// decision; the forward keeps running in the background.
    pub async fn handle(&self, event: PipelineEvent) -> DispatchOutcome {
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let dispatcher = self.clone();
        self.supervisor.spawn(async move {
            let outcome = dispatcher.dispatch(&event).await;
            let _ = outcome_tx.send(outcome);
            dispatcher.relay.forward(event).await;
        });

        outcome_rx.await.unwrap_or_else(|_| {
            error!("dispatch task ended without an outcome");
            DispatchOutcome::Interrupted
        })
    }

    /// Evaluate the current step and fire its callback if warranted.
    ///
    /// Never forwards; see [`Dispatcher::handle`].
    pub async fn dispatch(&self, event: &PipelineEvent) -> DispatchOutcome {
        let run_id = &event.run.run_id;
        let step = event.run.step;

        let Some(current) = event.current_step() else {
            warn!(%run_id, step, steps = event.run.steps.len(), "step index out of range");
            let message = format!(
                "Step {step} is out of range for a run with {} steps",
                event.run.steps.len()
            );
            self.relay.report_error(event, &message, &message).await;
            return DispatchOutcome::StepOutOfRange;
        };

        let condition = match Condition::parse(&current.args) {
            Ok(condition) => condition,
            Err(err) => {
                warn!(%run_id, step, error = %err, "failed to parse args");
                metric_inc("webhook.dispatch.invalid_args");
                self.relay
                    .report_error(event, &format!("Failed to parse args: {err}"), &format!("{err:?}"))
                    .await;
                return DispatchOutcome::InvalidArgs;
            }
        };

        match condition.evaluate(&event.event) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%run_id, step, %condition, "condition not met");
                return DispatchOutcome::NoMatch;
            }
            Err(err) => {
                debug!(%run_id, step, error = %err, "field unresolved, skipping callback");
                return DispatchOutcome::Unresolved;
            }
        }

        let callback = condition.callback.as_str();
        let already_called = match self.store.has_been_called(callback, run_id).await {
            Ok(called) => called,
            Err(err) => {
                warn!(%run_id, callback, error = %err, "failed to read call record, assuming not called");
                false
            }
        };
        if already_called {
            debug!(%run_id, callback, "callback already fired for this run");
            return DispatchOutcome::AlreadyCalled;
        }

        let result = self.relay.invoke_callback(callback).await;

        // Failed invocations count too, so exhaustion is not retried on the
        // next delivery of this run.
        if let Err(err) = self.store.increment(callback, run_id).await {
            error!(%run_id, callback, error = %err, "failed to record callback invocation");
        }

        match result {
            Ok(()) => {
                info!(%run_id, step, callback, "callback fired");
                metric_inc("webhook.callback.fired");
                DispatchOutcome::Fired
            }
            Err(err) => {
                error!(%run_id, step, callback, error = %err, "failed to send webhook");
                metric_inc("webhook.callback.failed");
                self.relay
                    .report_error(event, &format!("Failed to send webhook: {err}"), &format!("{err:?}"))
                    .await;
                DispatchOutcome::CallbackFailed
            }
        }
    }

    /// Number of dispatch-and-forward tasks still running.
    pub fn in_flight(&self) -> usize {
        self.supervisor.in_flight()
    }

    /// Wait, up to the configured timeout, for in-flight work.
    ///
    /// Returns `false` if some was abandoned.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_by(Instant::now() + self.config.shutdown_timeout)
            .await
    }

    /// Wait until `deadline` at the latest for in-flight work.
    pub async fn shutdown_by(&self, deadline: Instant) -> bool {
        let drained = self
            .supervisor
            .drain(deadline.saturating_duration_since(Instant::now()))
            .await;
        if drained {
            info!("all in-flight work finished");
        } else {
            warn!(
                in_flight = self.supervisor.in_flight(),
                timeout_secs = self.config.shutdown_timeout.as_secs_f64(),
                "shutdown deadline passed, abandoning in-flight work"
            );
        }
        drained
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}
