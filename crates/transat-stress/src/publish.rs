use crate::common::{elapsed_ms, elapsed_s, setup_ctrlc};
use crate::events::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use transat::{
    FaillibleStorage, FailurePlan, PublisherConfig, ResilientPublisher, Storage, TransatError,
};

pub struct PublishConfig {
    pub messages: u32,
    pub drop_rate: f64,
    pub seed: u64,
    pub workers: u32,
}

/// Publish `1..=messages` to two lossy in-memory backends, then check that
/// both held-sets are complete.
pub async fn run(
    config: PublishConfig,
    publisher_config: PublisherConfig,
    start: Instant,
) -> anyhow::Result<()> {
    let primary = Arc::new(FaillibleStorage::new(
        "primary",
        FailurePlan::Random {
            drop_rate: config.drop_rate,
            seed: config.seed,
        },
    ));
    let secondary = Arc::new(FaillibleStorage::new(
        "secondary",
        FailurePlan::Random {
            drop_rate: config.drop_rate,
            seed: config.seed.wrapping_add(1),
        },
    ));
    let publisher: Arc<ResilientPublisher<u32>> = Arc::new(ResilientPublisher::pair(
        primary.clone(),
        secondary.clone(),
        publisher_config,
    ));

    emit(&EventStarted::new(
        &publisher.id().to_string(),
        "publish",
        &[primary.name(), secondary.name()],
    ));
    eprintln!(
        "Publish mode → {} msgs, drop rate {:.2}, {} worker(s), order {:?}",
        config.messages,
        config.drop_rate,
        config.workers,
        publisher.config().confirm_order_value()
    );

    let cancel = setup_ctrlc();
    let workers = config.workers.max(1);
    tracing::info!(
        publisher = %publisher.id(),
        messages = config.messages,
        workers,
        "publish phase started"
    );
    let publish_start = Instant::now();
    let mut tasks = JoinSet::new();

    for worker in 0..workers {
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        let messages = config.messages;

        tasks.spawn(async move {
            let mut confirmed = 0u32;
            let mut failed = 0u32;

            for message in (1..=messages).filter(|m| (m - 1) % workers == worker) {
                let sent_at = Instant::now();
                match publisher.send_with_cancel(message, &cancel).await {
                    Ok(()) => {
                        confirmed += 1;
                        emit(&EventConfirmed {
                            event: "message_confirmed",
                            message,
                            worker,
                            latency_ms: elapsed_ms(sent_at),
                            elapsed_s: elapsed_s(start),
                        });
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::debug!(message, worker, "delivery failed: {e}");
                        emit(&EventDeliveryError {
                            event: "delivery_error",
                            message,
                            worker,
                            backend: e.backend().map(str::to_string),
                            error: e.to_string(),
                            elapsed_s: elapsed_s(start),
                        });
                        if matches!(e, TransatError::Cancelled { .. }) {
                            break;
                        }
                    }
                }
            }

            (confirmed, failed)
        });
    }

    let mut confirmed = 0u32;
    let mut failed = 0u32;
    while let Some(res) = tasks.join_next().await {
        let (c, f) = res?;
        confirmed += c;
        failed += f;
    }
    tracing::info!(confirmed, failed, "publish phase done, verifying held-sets");

    let expected: HashSet<u32> = (1..=config.messages).collect();
    let incomplete: Vec<String> = [&primary, &secondary]
        .iter()
        .filter(|backend| backend.values() != expected)
        .map(|backend| backend.name().to_string())
        .collect();

    let publish_s = publish_start.elapsed().as_secs_f64();
    let messages_per_sec = if publish_s > 0.0 {
        confirmed as f64 / publish_s
    } else {
        0.0
    };

    let summary = EventPublishSummary {
        event: "publish_summary",
        messages: config.messages,
        confirmed,
        failed,
        workers,
        backends: publisher.metrics(),
        incomplete,
        messages_per_sec,
        elapsed_s: elapsed_s(start),
    };
    emit(&summary);

    eprintln!(
        "\n  {confirmed}/{} confirmed, {failed} failed, {messages_per_sec:.0} msg/s",
        config.messages
    );
    for b in &summary.backends {
        eprintln!(
            "  {:<10} {} writes, {} dropped, {} confirmed",
            b.backend, b.store_attempts, b.dropped_writes, b.confirmations
        );
    }

    if failed > 0 || !summary.incomplete.is_empty() {
        anyhow::bail!(
            "{failed} message(s) failed, incomplete backends: {:?}",
            summary.incomplete
        );
    }

    Ok(())
}
