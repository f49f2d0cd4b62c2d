use async_trait::async_trait;

use crate::models::RelayMessage;

/// Downstream processing applied to each successfully parsed message.
///
/// Handlers run after the offset is committed; a returned error does not
/// cause redelivery, it is routed through the loop's failure policy.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &RelayMessage) -> anyhow::Result<()>;
}

/// Handler that only records receipt. Used by the retry loop, where
/// consumption itself is the terminal action.
pub struct LogOnlyHandler;

#[async_trait]
impl MessageHandler for LogOnlyHandler {
    async fn handle(&self, message: &RelayMessage) -> anyhow::Result<()> {
        tracing::info!(message_id = %message.id, "message consumed");
        Ok(())
    }
}
