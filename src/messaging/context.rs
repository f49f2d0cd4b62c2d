use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tokio::sync::mpsc;

use crate::config::Role;

// ============================================================================
// Broker Client Context
// ============================================================================
//
// librdkafka invokes error and log callbacks from its own threads. The
// context never touches the factories' connection slots directly: a fatal
// error is posted as a ConnectionEvent on a channel, and the owning factory
// drains the channel under its slot lock on the next acquisition. Non-fatal
// errors are logged and the connection is left untouched.
//
// ============================================================================

/// Identifies which connection slot a broker callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    Consumer(Role),
    Producer,
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotId::Consumer(role) => write!(f, "{role} consumer"),
            SlotId::Producer => write!(f, "producer"),
        }
    }
}

/// Posted when a fatal error makes a connection unusable.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub slot: SlotId,
    pub code: RDKafkaErrorCode,
    pub reason: String,
}

/// Shared `ClientContext` for every consumer and the producer connection.
pub struct RelayContext {
    slot: SlotId,
    invalidations: mpsc::UnboundedSender<ConnectionEvent>,
}

impl RelayContext {
    pub fn new(slot: SlotId, invalidations: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { slot, invalidations }
    }
}

pub(crate) fn error_code(error: &KafkaError) -> RDKafkaErrorCode {
    error.rdkafka_error_code().unwrap_or(RDKafkaErrorCode::Unknown)
}

/// librdkafka signals that a connection must be discarded with ERR__FATAL.
fn is_fatal(error: &KafkaError) -> bool {
    matches!(error.rdkafka_error_code(), Some(RDKafkaErrorCode::Fatal))
}

/// librdkafka renders client-side error codes with a "Local" prefix.
fn error_origin(code: RDKafkaErrorCode) -> &'static str {
    if code.to_string().starts_with("Local") {
        "client"
    } else {
        "broker"
    }
}

/// Severity of a broker log line on the structured logger's scale.
fn severity_label(level: RDKafkaLogLevel) -> &'static str {
    match level {
        RDKafkaLogLevel::Emerg | RDKafkaLogLevel::Alert | RDKafkaLogLevel::Critical => "critical",
        RDKafkaLogLevel::Error => "error",
        RDKafkaLogLevel::Warning => "warning",
        RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => "information",
        RDKafkaLogLevel::Debug => "debug",
    }
}

/// Broker log chatter below warning is dropped.
fn forwards(level: RDKafkaLogLevel) -> bool {
    matches!(severity_label(level), "critical" | "error" | "warning")
}

impl ClientContext for RelayContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        if !forwards(level) {
            return;
        }
        let severity = severity_label(level);
        match severity {
            "warning" => {
                tracing::warn!(slot = %self.slot, fac, severity, "{}", log_message)
            }
            _ => tracing::error!(slot = %self.slot, fac, severity, "{}", log_message),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let code = error_code(&error);
        let origin = error_origin(code);

        if is_fatal(&error) {
            tracing::error!(
                slot = %self.slot,
                code = %code,
                reason,
                origin,
                severity = "critical",
                "fatal connection error, the connection will be rebuilt on next use"
            );
            // The receiving factory may already be gone during shutdown.
            let _ = self.invalidations.send(ConnectionEvent {
                slot: self.slot,
                code,
                reason: reason.to_string(),
            });
        } else {
            tracing::error!(
                slot = %self.slot,
                code = %code,
                reason,
                origin,
                "non-fatal connection error"
            );
        }
    }
}

impl ConsumerContext for RelayContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping_follows_the_syslog_scale() {
        assert_eq!(severity_label(RDKafkaLogLevel::Emerg), "critical");
        assert_eq!(severity_label(RDKafkaLogLevel::Alert), "critical");
        assert_eq!(severity_label(RDKafkaLogLevel::Critical), "critical");
        assert_eq!(severity_label(RDKafkaLogLevel::Error), "error");
        assert_eq!(severity_label(RDKafkaLogLevel::Warning), "warning");
        assert_eq!(severity_label(RDKafkaLogLevel::Notice), "information");
        assert_eq!(severity_label(RDKafkaLogLevel::Info), "information");
        assert_eq!(severity_label(RDKafkaLogLevel::Debug), "debug");
    }

    #[test]
    fn only_warning_and_above_are_forwarded() {
        assert!(forwards(RDKafkaLogLevel::Critical));
        assert!(forwards(RDKafkaLogLevel::Error));
        assert!(forwards(RDKafkaLogLevel::Warning));
        assert!(!forwards(RDKafkaLogLevel::Notice));
        assert!(!forwards(RDKafkaLogLevel::Info));
        assert!(!forwards(RDKafkaLogLevel::Debug));
    }

    #[test]
    fn origin_distinguishes_client_codes_from_broker_codes() {
        assert_eq!(error_origin(RDKafkaErrorCode::AllBrokersDown), "client");
        assert_eq!(error_origin(RDKafkaErrorCode::OffsetOutOfRange), "broker");
    }

    #[test]
    fn fatal_error_posts_an_invalidation_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = RelayContext::new(SlotId::Consumer(Role::Primary), tx);

        ClientContext::error(
            &context,
            KafkaError::Global(RDKafkaErrorCode::Fatal),
            "broker session lost",
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.slot, SlotId::Consumer(Role::Primary));
        assert_eq!(event.code, RDKafkaErrorCode::Fatal);
        assert_eq!(event.reason, "broker session lost");
    }

    #[test]
    fn non_fatal_error_posts_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = RelayContext::new(SlotId::Producer, tx);

        ClientContext::error(
            &context,
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            "transient outage",
        );

        assert!(rx.try_recv().is_err());
    }
}
