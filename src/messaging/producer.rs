use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::context::{error_code, ConnectionEvent, RelayContext, SlotId};
use crate::config::{KafkaSettings, Role, RoleTable};
use crate::models::RelayMessage;

// ============================================================================
// Producer Connection Factory and Wrapper
// ============================================================================
//
// A single producer connection services every publish in the process. The
// factory follows the same lazy-create/fatal-rebuild contract as the
// consumer side, minus the subscription probe: producers have no
// subscription concept, so the only teardown trigger is a fatal error.
//
// ============================================================================

pub type RelayProducer = FutureProducer<RelayContext>;

pub struct ProducerFactory {
    settings: KafkaSettings,
    slot: Mutex<Option<RelayProducer>>,
    /// Count of connections built so far; bumps on every rebuild.
    generation: AtomicU64,
    invalidations_tx: mpsc::UnboundedSender<ConnectionEvent>,
    invalidations_rx: Mutex<mpsc::UnboundedReceiver<ConnectionEvent>>,
}

impl ProducerFactory {
    pub fn new(settings: KafkaSettings) -> Self {
        let (invalidations_tx, invalidations_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            invalidations_tx,
            invalidations_rx: Mutex::new(invalidations_rx),
        }
    }

    /// Returns the live producer, building one when the slot is empty or a
    /// fatal error invalidated the previous instance.
    pub fn get_or_create(&self) -> KafkaResult<RelayProducer> {
        self.apply_invalidations();

        if let Some(existing) = lock(&self.slot).as_ref() {
            return Ok(existing.clone());
        }

        // Creation blocks on librdkafka; the slot lock stays released while
        // it runs.
        let context = RelayContext::new(SlotId::Producer, self.invalidations_tx.clone());
        let producer: RelayProducer = self
            .settings
            .producer_client_config()
            .create_with_context(context)?;

        let mut slot = lock(&self.slot);
        // A concurrent caller may have populated the slot while this one was
        // building; the stored instance wins.
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(generation, "created producer connection");

        *slot = Some(producer.clone());
        Ok(producer)
    }

    fn apply_invalidations(&self) {
        let mut events = lock(&self.invalidations_rx);
        while let Ok(event) = events.try_recv() {
            if event.slot != SlotId::Producer {
                continue;
            }
            if lock(&self.slot).take().is_some() {
                tracing::warn!(
                    code = %event.code,
                    reason = %event.reason,
                    "discarded producer after fatal error"
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Broker persistence outcome for a publish, carrying librdkafka's
/// persistence-status integers.
///
/// The async send surface resolves to either a delivered record or an
/// error, with no intermediate state exposed, so [`ProducerWrapper::send`]
/// reports every resolved success as `Persisted`. `NotPersisted` and
/// `PossiblyPersisted` exist to keep the integer contract complete for
/// callers that log or compare status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DeliveryStatus {
    NotPersisted = 0,
    PossiblyPersisted = 1,
    Persisted = 2,
}

impl DeliveryStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to serialize message {id}: {source}")]
    Serialize {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("delivery to topic {topic} failed: {code}: {reason}")]
    Delivery {
        topic: String,
        code: RDKafkaErrorCode,
        reason: String,
    },

    #[error("producer connection unavailable")]
    Connection(#[from] KafkaError),
}

/// Publishes relay messages to a role's topic over the factory's connection.
///
/// The wrapper borrows the connection per call and never owns its lifetime;
/// teardown and rebuild stay with the factory.
pub struct ProducerWrapper {
    factory: Arc<ProducerFactory>,
    table: Arc<RoleTable>,
    queue_timeout: Duration,
}

impl ProducerWrapper {
    pub fn new(factory: Arc<ProducerFactory>, table: Arc<RoleTable>) -> Self {
        Self {
            factory,
            table,
            queue_timeout: Duration::from_secs(5),
        }
    }

    /// Serialize `message` and publish it to `role`'s topic.
    ///
    /// A delivery failure is logged and re-raised: the retry hand-off needs
    /// to know whether publication genuinely happened.
    pub async fn send(
        &self,
        role: Role,
        message: &RelayMessage,
    ) -> Result<DeliveryStatus, SendError> {
        let producer = self.factory.get_or_create()?;
        let payload = serde_json::to_string(message).map_err(|source| SendError::Serialize {
            id: message.id,
            source,
        })?;
        let topic = self.table.binding(role).topic.as_str();

        let record = FutureRecord::<(), _>::to(topic).payload(&payload);
        match producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok(delivery) => {
                tracing::info!(
                    message_id = %message.id,
                    topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "message delivered"
                );
                Ok(DeliveryStatus::Persisted)
            }
            Err((error, _unsent)) => {
                let code = error_code(&error);
                tracing::error!(
                    message_id = %message.id,
                    topic,
                    code = %code,
                    reason = %error,
                    "failed to deliver message"
                );
                Err(SendError::Delivery {
                    topic: topic.to_string(),
                    code,
                    reason: error.to_string(),
                })
            }
        }
    }

    // Transaction control is passed straight through to the underlying
    // connection, for callers that batch multi-message atomic writes.

    pub fn init_transactions(&self, timeout: Duration) -> KafkaResult<()> {
        self.factory.get_or_create()?.init_transactions(timeout)
    }

    pub fn begin_transaction(&self) -> KafkaResult<()> {
        self.factory.get_or_create()?.begin_transaction()
    }

    pub fn commit_transaction(&self, timeout: Duration) -> KafkaResult<()> {
        self.factory.get_or_create()?.commit_transaction(timeout)
    }

    pub fn abort_transaction(&self, timeout: Duration) -> KafkaResult<()> {
        self.factory.get_or_create()?.abort_transaction(timeout)
    }

    pub fn flush(&self, timeout: Duration) -> KafkaResult<()> {
        self.factory.get_or_create()?.flush(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory() -> ProducerFactory {
        ProducerFactory::new(KafkaSettings::default())
    }

    #[test]
    fn producer_is_built_once_and_reused() {
        let factory = factory();

        factory.get_or_create().unwrap();
        factory.get_or_create().unwrap();

        assert_eq!(factory.generation.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn fatal_event_forces_a_rebuild() {
        let factory = factory();
        factory.get_or_create().unwrap();

        factory
            .invalidations_tx
            .send(ConnectionEvent {
                slot: SlotId::Producer,
                code: RDKafkaErrorCode::Fatal,
                reason: "test".to_string(),
            })
            .unwrap();

        factory.get_or_create().unwrap();
        assert_eq!(factory.generation.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn consumer_events_do_not_touch_the_producer_slot() {
        let factory = factory();
        factory.get_or_create().unwrap();

        factory
            .invalidations_tx
            .send(ConnectionEvent {
                slot: SlotId::Consumer(Role::Primary),
                code: RDKafkaErrorCode::Fatal,
                reason: "test".to_string(),
            })
            .unwrap();

        factory.get_or_create().unwrap();
        assert_eq!(factory.generation.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn delivery_status_codes_are_stable() {
        assert_eq!(DeliveryStatus::NotPersisted.code(), 0);
        assert_eq!(DeliveryStatus::PossiblyPersisted.code(), 1);
        assert_eq!(DeliveryStatus::Persisted.code(), 2);
    }

    #[tokio::test]
    async fn delivery_failure_is_surfaced_to_the_caller() {
        // No broker listens on port 1; delivery fails at message.timeout.ms.
        let mut settings = KafkaSettings::default();
        settings.brokers = "127.0.0.1:1".to_string();
        settings.producer.message_timeout_ms = 300;

        let table = Arc::new(settings.resolve_roles().unwrap());
        let wrapper = ProducerWrapper::new(Arc::new(ProducerFactory::new(settings)), table);

        let result = wrapper
            .send(Role::Retry, &RelayMessage::new(json!({"k": "v"})))
            .await;

        assert!(matches!(result, Err(SendError::Delivery { .. })));
    }
}
