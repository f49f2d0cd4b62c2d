use std::sync::{Arc, Mutex, MutexGuard};

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use tokio::sync::mpsc;

use super::context::{ConnectionEvent, RelayContext, SlotId};
use crate::config::{KafkaSettings, Role, RoleTable};

// ============================================================================
// Consumer Connection Factory
// ============================================================================
//
// One mutex-guarded slot per role. A slot is populated lazily on first
// demand, reused while the stored consumer still holds a subscription, and
// cleared only by the fatal-error path: the broker callback posts a
// ConnectionEvent and the event is applied here, under the slot lock, before
// the next acquisition. There is no proactive reconnect loop; recovery
// happens on the next consume attempt.
//
// ============================================================================

pub type RelayConsumer = StreamConsumer<RelayContext>;

pub struct ConsumerFactory {
    settings: KafkaSettings,
    table: Arc<RoleTable>,
    primary: Mutex<Option<Arc<RelayConsumer>>>,
    retry: Mutex<Option<Arc<RelayConsumer>>>,
    invalidations_tx: mpsc::UnboundedSender<ConnectionEvent>,
    invalidations_rx: Mutex<mpsc::UnboundedReceiver<ConnectionEvent>>,
}

impl ConsumerFactory {
    pub fn new(settings: KafkaSettings, table: Arc<RoleTable>) -> Self {
        let (invalidations_tx, invalidations_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            table,
            primary: Mutex::new(None),
            retry: Mutex::new(None),
            invalidations_tx,
            invalidations_rx: Mutex::new(invalidations_rx),
        }
    }

    /// Returns the live consumer for `role`, building a fresh one when the
    /// slot is empty, when a fatal error invalidated the previous instance,
    /// or when the existing instance reports zero active subscriptions.
    pub fn get_or_create(&self, role: Role) -> KafkaResult<Arc<RelayConsumer>> {
        self.apply_invalidations();

        if let Some(existing) = lock(self.slot(role)).as_ref() {
            if subscription_count(existing) > 0 {
                return Ok(Arc::clone(existing));
            }
            tracing::warn!(role = %role, "consumer lost its subscription, rebuilding");
        }

        // Creation and subscribe block on librdkafka; the slot lock stays
        // released while they run.
        let binding = self.table.binding(role);
        let context = RelayContext::new(SlotId::Consumer(role), self.invalidations_tx.clone());
        let consumer: RelayConsumer = self
            .settings
            .consumer_client_config(&binding.group_id)
            .create_with_context(context)?;
        consumer.subscribe(&[binding.topic.as_str()])?;

        tracing::info!(
            role = %role,
            group_id = %binding.group_id,
            topic = %binding.topic,
            "created and subscribed consumer"
        );

        let consumer = Arc::new(consumer);
        let mut slot = lock(self.slot(role));
        // A concurrent caller may have populated the slot while this one was
        // building; the stored instance wins.
        if let Some(existing) = slot.as_ref() {
            if subscription_count(existing) > 0 {
                return Ok(Arc::clone(existing));
            }
        }
        *slot = Some(Arc::clone(&consumer));
        Ok(consumer)
    }

    /// Tear down every consumer flagged fatal since the last acquisition.
    fn apply_invalidations(&self) {
        let mut events = lock(&self.invalidations_rx);
        while let Ok(event) = events.try_recv() {
            let SlotId::Consumer(role) = event.slot else {
                continue;
            };
            if lock(self.slot(role)).take().is_some() {
                tracing::warn!(
                    role = %role,
                    code = %event.code,
                    reason = %event.reason,
                    "discarded consumer after fatal error"
                );
            }
        }
    }

    fn slot(&self, role: Role) -> &Mutex<Option<Arc<RelayConsumer>>> {
        match role {
            Role::Primary => &self.primary,
            Role::Retry => &self.retry,
        }
    }
}

fn subscription_count(consumer: &RelayConsumer) -> usize {
    consumer
        .subscription()
        .map(|subscription| subscription.count())
        .unwrap_or(0)
}

// Critical sections here are tiny and panic-free; a poisoned lock still
// holds a usable slot.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::types::RDKafkaErrorCode;

    fn factory() -> ConsumerFactory {
        let settings = KafkaSettings::default();
        let table = Arc::new(settings.resolve_roles().unwrap());
        ConsumerFactory::new(settings, table)
    }

    #[tokio::test]
    async fn same_consumer_is_reused_while_subscribed() {
        let factory = factory();

        let first = factory.get_or_create(Role::Primary).unwrap();
        let second = factory.get_or_create(Role::Primary).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn roles_get_independent_consumers() {
        let factory = factory();

        let primary = factory.get_or_create(Role::Primary).unwrap();
        let retry = factory.get_or_create(Role::Retry).unwrap();

        assert!(!Arc::ptr_eq(&primary, &retry));
    }

    #[tokio::test]
    async fn fatal_event_forces_a_rebuild_of_that_role_only() {
        let factory = factory();
        let primary = factory.get_or_create(Role::Primary).unwrap();
        let retry = factory.get_or_create(Role::Retry).unwrap();

        factory
            .invalidations_tx
            .send(ConnectionEvent {
                slot: SlotId::Consumer(Role::Primary),
                code: RDKafkaErrorCode::Fatal,
                reason: "test".to_string(),
            })
            .unwrap();

        let rebuilt = factory.get_or_create(Role::Primary).unwrap();
        let retry_again = factory.get_or_create(Role::Retry).unwrap();

        assert!(!Arc::ptr_eq(&primary, &rebuilt));
        assert!(Arc::ptr_eq(&retry, &retry_again));

        // The replacement carries exactly one subscription, to the primary
        // topic.
        let subscription = rebuilt.subscription().unwrap();
        assert_eq!(subscription.count(), 1);
        assert_eq!(
            subscription.elements()[0].topic(),
            factory.table.binding(Role::Primary).topic
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_acquisitions_converge_on_a_single_consumer() {
        let factory = Arc::new(factory());
        let runtime = tokio::runtime::Handle::current();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let factory = Arc::clone(&factory);
                let runtime = runtime.clone();
                std::thread::spawn(move || {
                    let _guard = runtime.enter();
                    factory.get_or_create(Role::Primary).unwrap()
                })
            })
            .collect();
        let built: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let settled = factory.get_or_create(Role::Primary).unwrap();
        assert!(built.iter().any(|consumer| Arc::ptr_eq(consumer, &settled)));
    }

    #[tokio::test]
    async fn producer_events_are_ignored_by_the_consumer_factory() {
        let factory = factory();
        let primary = factory.get_or_create(Role::Primary).unwrap();

        factory
            .invalidations_tx
            .send(ConnectionEvent {
                slot: SlotId::Producer,
                code: RDKafkaErrorCode::Fatal,
                reason: "test".to_string(),
            })
            .unwrap();

        let again = factory.get_or_create(Role::Primary).unwrap();
        assert!(Arc::ptr_eq(&primary, &again));
    }
}
