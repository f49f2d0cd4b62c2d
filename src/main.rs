use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kafka_relay::config::{KafkaSettings, Role};
use kafka_relay::messaging::{ConsumerFactory, ProducerFactory, ProducerWrapper};
use kafka_relay::pipeline::{ConsumeLoop, Discard, ForwardToRetry, LogOnlyHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging with environment-based filtering.
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kafka_relay=debug")),
        )
        .init();

    let mut settings = KafkaSettings::default();
    if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
        settings.brokers = brokers;
    }

    // Unresolvable topics or groups abort here, before any loop starts.
    let table = Arc::new(settings.resolve_roles()?);
    tracing::info!(
        brokers = %settings.brokers,
        primary_topic = %table.binding(Role::Primary).topic,
        retry_topic = %table.binding(Role::Retry).topic,
        "resolved role bindings"
    );

    let consumers = Arc::new(ConsumerFactory::new(settings.clone(), Arc::clone(&table)));
    let producers = Arc::new(ProducerFactory::new(settings.clone()));
    let producer = Arc::new(ProducerWrapper::new(producers, Arc::clone(&table)));

    let shutdown = CancellationToken::new();

    let primary = ConsumeLoop::new(
        Role::Primary,
        Arc::clone(&consumers),
        Arc::clone(&table),
        Arc::new(LogOnlyHandler),
        Arc::new(ForwardToRetry::new(Arc::clone(&producer))),
    );
    let retry = ConsumeLoop::new(
        Role::Retry,
        Arc::clone(&consumers),
        Arc::clone(&table),
        Arc::new(LogOnlyHandler),
        Arc::new(Discard),
    );

    let primary_task = tokio::spawn(primary.run(shutdown.clone()));
    let retry_task = tokio::spawn(retry.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    shutdown.cancel();

    if let Err(error) = primary_task.await {
        tracing::error!(error = %error, "primary consume loop task failed");
    }
    if let Err(error) = retry_task.await {
        tracing::error!(error = %error, "retry consume loop task failed");
    }

    Ok(())
}
