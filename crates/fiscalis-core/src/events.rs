//! Progress events published while subjects are aggregated.
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `run_started` | A batch run begins |
//! | `batch_started` | One batch phase begins |
//! | `provider_completed` | One provider attempt for one subject is recorded |
//! | `subject_completed` | A subject aggregate is ready |
//! | `batch_completed` | Every subject of a phase has resolved |
//! | `run_completed` | The run summary is ready |
//!
//! Events go out on a `tokio::sync::broadcast` channel. Publishing never
//! blocks and never fails; events published with no subscriber are dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{Coverage, ProviderId, SubjectId};

const LOG_TARGET: &str = "fiscalis::events";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: Uuid,
        subjects: usize,
        batches: usize,
    },
    BatchStarted {
        run_id: Uuid,
        index: usize,
        of: usize,
        size: usize,
    },
    ProviderCompleted {
        subject: SubjectId,
        provider: ProviderId,
        provider_name: String,
        success: bool,
        records_found: usize,
        value_found: f64,
        elapsed_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SubjectCompleted {
        subject: SubjectId,
        coverage: Coverage,
        opportunities: usize,
        total_value: f64,
        elapsed_ms: u64,
    },
    BatchCompleted {
        run_id: Uuid,
        index: usize,
        of: usize,
        processed: usize,
        elapsed_ms: u64,
    },
    RunCompleted {
        run_id: Uuid,
        attempted: usize,
        processed: usize,
        total_opportunities: usize,
        total_value: f64,
        elapsed_ms: u64,
    },
}

impl ProgressEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::BatchStarted { .. } => "batch_started",
            Self::ProviderCompleted { .. } => "provider_completed",
            Self::SubjectCompleted { .. } => "subject_completed",
            Self::BatchCompleted { .. } => "batch_completed",
            Self::RunCompleted { .. } => "run_completed",
        }
    }

    /// One-line human-readable rendering.
    pub fn describe(&self) -> String {
        match self {
            Self::RunStarted {
                subjects, batches, ..
            } => format!("run started: {subjects} subject(s) in {batches} batch(es)"),
            Self::BatchStarted { index, of, size, .. } => {
                format!("batch {}/{of} started with {size} subject(s)", index + 1)
            }
            Self::ProviderCompleted {
                subject,
                provider_name,
                success: true,
                records_found,
                value_found,
                elapsed_ms,
                ..
            } => format!(
                "{provider_name}: {records_found} record(s) worth {value_found:.2} for {subject} in {elapsed_ms} ms"
            ),
            Self::ProviderCompleted {
                subject,
                provider_name,
                error,
                elapsed_ms,
                ..
            } => format!(
                "{provider_name}: failed for {subject} after {elapsed_ms} ms ({})",
                error.as_deref().unwrap_or("unknown error")
            ),
            Self::SubjectCompleted {
                subject,
                coverage,
                opportunities,
                total_value,
                ..
            } => format!(
                "{subject} {}: {opportunities} opportunit(ies) worth {total_value:.2}",
                coverage.label()
            ),
            Self::BatchCompleted {
                index,
                of,
                processed,
                elapsed_ms,
                ..
            } => format!(
                "batch {}/{of} completed: {processed} subject(s) in {elapsed_ms} ms",
                index + 1
            ),
            Self::RunCompleted {
                attempted,
                processed,
                total_opportunities,
                total_value,
                elapsed_ms,
                ..
            } => format!(
                "run completed: {processed}/{attempted} subject(s), {total_opportunities} opportunit(ies) worth {total_value:.2} in {elapsed_ms} ms"
            ),
        }
    }
}

/// Broadcast channel for [`ProgressEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// Slow subscribers lose the oldest events once `capacity` are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        log::trace!(target: LOG_TARGET, "{}", event.name());
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receives progress events; delivery and formatting are up to the implementation.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &ProgressEvent);
}

/// Writes every event to the log at info level (debug for per-provider events).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ProviderCompleted { success: false, .. } => {
                log::warn!(target: LOG_TARGET, "{}", event.describe());
            }
            ProgressEvent::ProviderCompleted { .. } => {
                log::debug!(target: LOG_TARGET, "{}", event.describe());
            }
            _ => log::info!(target: LOG_TARGET, "{}", event.describe()),
        }
    }
}

/// Drains `receiver` into `sink` until the bus is dropped.
pub fn spawn_sink(
    mut receiver: broadcast::Receiver<ProgressEvent>,
    sink: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => sink.notify(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(target: LOG_TARGET, "notification sink lagged, {skipped} event(s) skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<&'static str>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, event: &ProgressEvent) {
            self.seen.lock().expect("lock").push(event.name());
        }
    }

    fn run_started() -> ProgressEvent {
        ProgressEvent::RunStarted {
            run_id: Uuid::nil(),
            subjects: 3,
            batches: 2,
        }
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let bus = EventBus::new(4);

        bus.publish(run_started());

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn sink_receives_events_until_bus_is_dropped() {
        let bus = EventBus::new(8);
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_sink(bus.subscribe(), sink.clone());

        bus.publish(run_started());
        bus.publish(ProgressEvent::RunCompleted {
            run_id: Uuid::nil(),
            attempted: 3,
            processed: 3,
            total_opportunities: 0,
            total_value: 0.0,
            elapsed_ms: 1,
        });
        drop(bus);
        handle.await.expect("sink task completes");

        assert_eq!(
            *sink.seen.lock().expect("lock"),
            vec!["run_started", "run_completed"]
        );
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let json = serde_json::to_value(run_started()).expect("serializes");

        assert_eq!(json["event"], "run_started");
        assert_eq!(json["batches"], 2);
    }

    #[test]
    fn failed_provider_description_names_the_error() {
        let event = ProgressEvent::ProviderCompleted {
            subject: SubjectId::parse("12345678000190").expect("valid cnpj"),
            provider: ProviderId::parse("serasa").expect("valid id"),
            provider_name: String::from("Serasa Experian"),
            success: false,
            records_found: 0,
            value_found: 0.0,
            elapsed_ms: 12,
            error: Some(String::from("upstream unavailable")),
        };

        assert_eq!(
            event.describe(),
            "Serasa Experian: failed for 12345678000190 after 12 ms (upstream unavailable)"
        );
    }
}
