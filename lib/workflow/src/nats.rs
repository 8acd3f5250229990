//! NATS JetStream work queue.
//!
//! Both logical queues live on one work-queue stream, one subject each:
//! - `lantern.jobs.workflow`
//! - `lantern.jobs.node`
//!
//! Consumers are durable pull consumers with explicit ack, so a job that is
//! never acked (crash) or is nacked (infrastructure error) is redelivered.
//! Node jobs carry their idempotency key as `Nats-Msg-Id`, which lets the
//! stream's duplicate window drop repeated dispatches.

use crate::envelope::Envelope;
use crate::queue::{Acknowledge, Delivery, Job, JobStream, QueueError, QueueKind, WorkQueue};
use async_nats::HeaderMap;
use async_nats::jetstream::{self, AckKind, consumer::pull};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;

/// Subject prefix for jobs.
const JOBS_SUBJECT_PREFIX: &str = "lantern.jobs";

/// Stream name for jobs.
const JOBS_STREAM_NAME: &str = "LANTERN_JOBS";

/// Prefix for durable consumer names.
const CONSUMER_PREFIX: &str = "lantern-worker";

/// Default JetStream duplicate window.
const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Configuration for the NATS work queue.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name for jobs (defaults to LANTERN_JOBS).
    pub stream_name: Option<String>,
    /// Durable consumer name prefix (defaults to lantern-worker).
    pub consumer_prefix: Option<String>,
    /// Window in which repeated `Nats-Msg-Id`s are dropped.
    pub duplicate_window: Option<Duration>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
            consumer_prefix: None,
            duplicate_window: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(JOBS_STREAM_NAME)
    }

    fn consumer_name(&self, kind: QueueKind) -> String {
        let prefix = self.consumer_prefix.as_deref().unwrap_or(CONSUMER_PREFIX);
        format!("{prefix}-{}", kind.name())
    }

    fn duplicate_window(&self) -> Duration {
        self.duplicate_window.unwrap_or(DEFAULT_DUPLICATE_WINDOW)
    }
}

/// Returns the subject jobs of a kind are published to.
fn subject(kind: QueueKind) -> String {
    let suffix = match kind {
        QueueKind::Workflow => "workflow",
        QueueKind::Node => "node",
    };
    format!("{JOBS_SUBJECT_PREFIX}.{suffix}")
}

/// JetStream-backed work queue.
#[derive(Clone)]
pub struct NatsWorkQueue {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsWorkQueue {
    /// Connects and ensures the job stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn connect(config: NatsConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            QueueError::ConnectionFailed {
                message: e.to_string(),
            }
        })?;

        let jetstream = async_nats::jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{JOBS_SUBJECT_PREFIX}.>")],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            duplicate_window: config.duplicate_window(),
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to create job stream: {e}"),
            })?;

        Ok(Self { jetstream, config })
    }

    /// Opens a durable consumer for one logical queue.
    ///
    /// Workers sharing a consumer name split the jobs between them.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created.
    pub async fn subscribe(&self, kind: QueueKind) -> Result<NatsJobStream, QueueError> {
        let receive_failed = |e: &dyn std::fmt::Display| QueueError::ReceiveFailed {
            message: e.to_string(),
        };

        let stream = self
            .jetstream
            .get_stream(self.config.stream())
            .await
            .map_err(|e| receive_failed(&e))?;

        let name = self.config.consumer_name(kind);
        let consumer = stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: subject(kind),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| receive_failed(&e))?;

        let messages = consumer.messages().await.map_err(|e| receive_failed(&e))?;

        tracing::info!(consumer = %name, queue = kind.name(), "subscribed to job queue");

        Ok(NatsJobStream {
            messages: Mutex::new(messages),
        })
    }
}

#[async_trait]
impl WorkQueue for NatsWorkQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let subject = subject(job.kind());
        let mut headers = HeaderMap::new();
        if let Some(key) = job.idempotency_key() {
            headers.insert(async_nats::header::NATS_MESSAGE_ID, key.as_str());
        }

        let bytes = Envelope::new(job)
            .to_json_bytes()
            .map_err(|e| QueueError::PublishFailed {
                message: format!("failed to serialize job: {e}"),
            })?;

        self.jetstream
            .publish_with_headers(subject, headers, bytes.into())
            .await
            .map_err(|e| QueueError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

/// Jobs delivered by a durable pull consumer.
pub struct NatsJobStream {
    messages: Mutex<pull::Stream>,
}

#[async_trait]
impl JobStream for NatsJobStream {
    async fn next_delivery(&self) -> Result<Option<Delivery>, QueueError> {
        let mut messages = self.messages.lock().await;
        loop {
            let Some(message) = messages.next().await else {
                return Ok(None);
            };
            let message = message.map_err(|e| QueueError::ReceiveFailed {
                message: e.to_string(),
            })?;

            match Envelope::<Job>::decode(&message.payload) {
                Ok(envelope) => {
                    return Ok(Some(Delivery {
                        job: envelope.into_payload(),
                        acker: Box::new(NatsAcker { message }),
                    }));
                }
                Err(e) => {
                    // Redelivery cannot fix a payload we cannot read.
                    tracing::warn!(subject = %message.subject, error = %e, "terminating undecodable job");
                    message
                        .ack_with(AckKind::Term)
                        .await
                        .map_err(|e| QueueError::AckFailed {
                            message: e.to_string(),
                        })?;
                }
            }
        }
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledge for NatsAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.message.ack().await.map_err(|e| QueueError::AckFailed {
            message: e.to_string(),
        })
    }

    async fn nack(&self) -> Result<(), QueueError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| QueueError::AckFailed {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nats_config_defaults() {
        let config = NatsConfig::new("nats://localhost:4222");

        assert_eq!(config.stream(), JOBS_STREAM_NAME);
        assert_eq!(
            config.consumer_name(QueueKind::Node),
            "lantern-worker-node-execution-queue"
        );
        assert_eq!(config.duplicate_window(), DEFAULT_DUPLICATE_WINDOW);
    }

    #[test]
    fn nats_config_custom() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_string(),
            stream_name: Some("CUSTOM_JOBS".to_string()),
            consumer_prefix: Some("blue".to_string()),
            duplicate_window: Some(Duration::from_secs(30)),
        };

        assert_eq!(config.stream(), "CUSTOM_JOBS");
        assert_eq!(
            config.consumer_name(QueueKind::Workflow),
            "blue-workflow-execution-queue"
        );
        assert_eq!(config.duplicate_window(), Duration::from_secs(30));
    }

    #[test]
    fn subjects_are_under_stream_prefix() {
        assert_eq!(subject(QueueKind::Workflow), "lantern.jobs.workflow");
        assert_eq!(subject(QueueKind::Node), "lantern.jobs.node");
    }
}
