//! Kafka relay pipeline.
//!
//! Consumes from a primary topic, commits offsets on parse success, and
//! routes processing failures to a retry topic drained by an independent
//! loop. Connection lifecycle is lazy: fatal broker errors tear a connection
//! down and the next acquisition rebuilds it.

pub mod config;
pub mod messaging;
pub mod models;
pub mod pipeline;

pub use config::{ConfigError, KafkaSettings, Role, RoleTable};
pub use models::RelayMessage;
