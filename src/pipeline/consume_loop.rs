use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer};
use rdkafka::message::{BorrowedMessage, Message};
use tokio_util::sync::CancellationToken;

use super::handler::MessageHandler;
use crate::config::{Role, RoleTable};
use crate::messaging::{error_code, ConsumerFactory, ProducerWrapper, RelayConsumer};
use crate::models::RelayMessage;

// ============================================================================
// Consume Loop
// ============================================================================
//
// One state machine serves both roles; only the failure policy differs.
// Broker-level errors never stop the loop, they are logged and the next
// iteration re-acquires the consumer (which is where a fatal teardown turns
// into a rebuild). The only exit is the cancellation token, observed at the
// blocking poll so shutdown does not wait for message arrival.
//
// Offsets are committed on parse success, before processing. A later
// processing failure therefore cannot redeliver the offset; it goes to the
// retry topic instead. This is a deliberate at-least-once tradeoff.
//
// ============================================================================

/// What a loop does with a parsed message its handler rejected.
#[async_trait]
pub trait FailurePolicy: Send + Sync {
    async fn on_processing_failure(&self, message: &RelayMessage, error: &anyhow::Error);
}

/// Primary-loop policy: hand the message off to the retry topic.
///
/// A failed hand-off is logged and dropped. This is the pipeline's
/// absorption boundary; nothing escalates past it.
pub struct ForwardToRetry {
    producer: Arc<ProducerWrapper>,
}

impl ForwardToRetry {
    pub fn new(producer: Arc<ProducerWrapper>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl FailurePolicy for ForwardToRetry {
    async fn on_processing_failure(&self, message: &RelayMessage, error: &anyhow::Error) {
        tracing::error!(
            message_id = %message.id,
            error = %error,
            "processing failed, publishing to retry topic"
        );
        if let Err(send_error) = self.producer.send(Role::Retry, message).await {
            tracing::error!(
                message_id = %message.id,
                error = %send_error,
                "retry publish failed, dropping message"
            );
        }
    }
}

/// Retry-loop policy: the retry topic is a terminal sink.
pub struct Discard;

#[async_trait]
impl FailurePolicy for Discard {
    async fn on_processing_failure(&self, message: &RelayMessage, error: &anyhow::Error) {
        tracing::error!(
            message_id = %message.id,
            error = %error,
            "processing failed, message dropped"
        );
    }
}

pub struct ConsumeLoop {
    role: Role,
    consumers: Arc<ConsumerFactory>,
    table: Arc<RoleTable>,
    handler: Arc<dyn MessageHandler>,
    failure_policy: Arc<dyn FailurePolicy>,
}

impl ConsumeLoop {
    pub fn new(
        role: Role,
        consumers: Arc<ConsumerFactory>,
        table: Arc<RoleTable>,
        handler: Arc<dyn MessageHandler>,
        failure_policy: Arc<dyn FailurePolicy>,
    ) -> Self {
        Self {
            role,
            consumers,
            table,
            handler,
            failure_policy,
        }
    }

    /// Poll until `shutdown` is cancelled. Iterations are strictly
    /// sequential; the poll is the loop's only suspension point.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(role = %self.role, topic = %self.topic(), "consume loop started");

        while !shutdown.is_cancelled() {
            let consumer = match self.consumers.get_or_create(self.role) {
                Ok(consumer) => consumer,
                Err(error) => {
                    tracing::error!(role = %self.role, error = %error, "failed to obtain consumer");
                    // Brief pause so a persistent creation failure cannot
                    // spin the loop hot.
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = consumer.recv() => match received {
                    Ok(message) => self.handle_message(&consumer, &message).await,
                    Err(error) => {
                        tracing::error!(
                            role = %self.role,
                            topic = %self.topic(),
                            code = %error_code(&error),
                            reason = %error,
                            "failed to consume message"
                        );
                    }
                }
            }
        }

        tracing::info!(role = %self.role, "consume loop stopped");
    }

    async fn handle_message(&self, consumer: &RelayConsumer, message: &BorrowedMessage<'_>) {
        let Some(payload) = message.payload() else {
            tracing::warn!(
                role = %self.role,
                topic = message.topic(),
                "skipping message with empty payload"
            );
            return;
        };

        let parsed: RelayMessage = match serde_json::from_slice(payload) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::error!(
                    role = %self.role,
                    topic = message.topic(),
                    error = %error,
                    "discarding message that failed to deserialize"
                );
                return;
            }
        };

        // Commit on parse success, before processing.
        if let Err(error) = consumer.commit_message(message, CommitMode::Sync) {
            tracing::error!(
                role = %self.role,
                message_id = %parsed.id,
                code = %error_code(&error),
                reason = %error,
                "offset commit failed"
            );
            return;
        }

        self.process(parsed).await;
    }

    async fn process(&self, message: RelayMessage) {
        if let Err(error) = self.handler.handle(&message).await {
            self.failure_policy
                .on_processing_failure(&message, &error)
                .await;
        }
    }

    fn topic(&self) -> &str {
        &self.table.binding(self.role).topic
    }
}
