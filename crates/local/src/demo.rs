use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reclaim_consumer::{BoxError, StreamListener};
use reclaim_log::{Fields, Record, StreamLog};
use reclaim_log_memory::MemoryStreamLog;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Listener that fails a random share of its records.
pub struct Billing {
    pub stream: String,
    pub group: String,
    pub failure_rate: f64,
}

#[async_trait]
impl StreamListener for Billing {
    fn stream_key(&self) -> &str {
        &self.stream
    }

    fn group(&self) -> &str {
        &self.group
    }

    async fn on_message(&self, record: &Record) -> Result<(), BoxError> {
        let order = record
            .field("order")
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default();

        if fastrand::f64() < self.failure_rate {
            return Err(format!("payment provider rejected {order}").into());
        }

        info!(%order, id = %record.id, "billed");
        Ok(())
    }
}

/// Appends a numbered order every `period` until cancelled.
pub async fn publish_orders(
    log: MemoryStreamLog,
    stream: String,
    period: Duration,
    shutdown_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {
                sequence += 1;
                let fields = Fields::from([(
                    "order".to_string(),
                    Bytes::from(format!("order-{sequence}")),
                )]);

                if let Err(e) = log.add(&stream, fields).await {
                    warn!(error = %e, "failed to publish order");
                }
            }
        }
    }
}
