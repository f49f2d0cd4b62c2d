// ============================================================================
// Messaging Module
// ============================================================================
//
// Broker connection lifecycle: lazy single-slot factories for consumers and
// the producer, the shared client context that classifies broker errors, and
// the producer wrapper the pipeline publishes through.
//
// ============================================================================

mod consumer;
mod context;
mod producer;

pub use consumer::{ConsumerFactory, RelayConsumer};
pub use producer::{DeliveryStatus, ProducerFactory, ProducerWrapper, SendError};

pub(crate) use context::error_code;
