//! Ambient broker (§5: "the broker owns in-flight work").
//!
//! Per-pool work queues sit between the Scheduler and the pool workers. The
//! production backend is AMQP via `lapin`, grounded on the `QueueHandle`
//! pattern in the pack's `sa-work-queue` runner (`queue_declare` once,
//! `basic_publish`/`basic_consume` per job); a `tokio::sync::mpsc`-backed
//! in-process implementation of the same trait lets the whole pipeline run
//! without a broker for local dev and tests, selected by `Config::broker_url`
//! being `None`.

use crate::model::Pool;
use crate::scheduler::FetchJob;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

fn queue_name(pool: Pool) -> &'static str {
    match pool {
        Pool::FastPool => "pautaradar.fast",
        Pool::HeavyRenderPool => "pautaradar.render",
        Pool::DeepExtractPool => "pautaradar.deep",
    }
}

/// A delivered job plus whatever handle its backend needs to acknowledge
/// completion. The in-process backend never redelivers, so `ack` is a no-op
/// there; the AMQP backend acks the underlying delivery tag.
pub struct Delivery {
    pub job: FetchJob,
    ack: DeliveryAck,
}

enum DeliveryAck {
    None,
    Amqp { channel: Channel, delivery_tag: u64 },
}

impl Delivery {
    pub async fn ack(self) -> Result<()> {
        match self.ack {
            DeliveryAck::None => Ok(()),
            DeliveryAck::Amqp { channel, delivery_tag } => channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
                .context("failed to ack amqp delivery"),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, job: FetchJob) -> Result<()>;
    async fn dequeue(&self, pool: Pool) -> Result<Option<Delivery>>;
}

/// AMQP-backed broker: one durable queue per pool, declared lazily on first
/// use of that pool.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    pub async fn connect(addr: &str) -> Result<Self> {
        let connection = Connection::connect(addr, ConnectionProperties::default())
            .await
            .context("failed to connect to amqp broker")?;
        let channel = connection
            .create_channel()
            .await
            .context("failed to open amqp channel")?;
        Ok(Self { connection, channel })
    }

    async fn declare(&self, pool: Pool) -> Result<()> {
        self.channel
            .queue_declare(
                queue_name(pool),
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .context("queue_declare failed")?;
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn enqueue(&self, job: FetchJob) -> Result<()> {
        self.declare(job.pool).await?;
        let payload = serde_json::to_vec(&SerializableJob::from(&job))?;
        self.channel
            .basic_publish(
                "",
                queue_name(job.pool),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .context("basic_publish failed")?
            .await
            .context("publisher confirm failed")?;
        Ok(())
    }

    async fn dequeue(&self, pool: Pool) -> Result<Option<Delivery>> {
        self.declare(pool).await?;
        let mut consumer = self
            .channel
            .basic_consume(
                queue_name(pool),
                "pautaradar-worker",
                BasicConsumeOptions { no_ack: false, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .context("basic_consume failed")?;
        match consumer.next().await {
            Some(Ok(delivery)) => {
                let job: SerializableJob = serde_json::from_slice(&delivery.data)
                    .context("failed to decode job payload")?;
                Ok(Some(Delivery {
                    job: job.into(),
                    ack: DeliveryAck::Amqp {
                        channel: self.channel.clone(),
                        delivery_tag: delivery.delivery_tag,
                    },
                }))
            }
            Some(Err(e)) => Err(e).context("amqp consumer error"),
            None => Ok(None),
        }
    }
}

impl Drop for AmqpBroker {
    fn drop(&mut self) {
        let _ = &self.connection;
    }
}

/// In-process broker for local development and tests: one bounded
/// `tokio::sync::mpsc` channel per pool, created on first use.
pub struct InProcessBroker {
    senders: Mutex<HashMap<Pool, mpsc::Sender<FetchJob>>>,
    receivers: Mutex<HashMap<Pool, Arc<Mutex<mpsc::Receiver<FetchJob>>>>>,
    capacity: usize,
}

impl InProcessBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    async fn sender_for(&self, pool: Pool) -> mpsc::Sender<FetchJob> {
        let mut senders = self.senders.lock().await;
        if let Some(tx) = senders.get(&pool) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        senders.insert(pool, tx.clone());
        self.receivers.lock().await.insert(pool, Arc::new(Mutex::new(rx)));
        tx
    }

    async fn receiver_for(&self, pool: Pool) -> Arc<Mutex<mpsc::Receiver<FetchJob>>> {
        {
            if let Some(rx) = self.receivers.lock().await.get(&pool) {
                return rx.clone();
            }
        }
        // No producer has enqueued into this pool yet; create it so the
        // consumer doesn't deadlock waiting for a channel that never shows up.
        self.sender_for(pool).await;
        self.receivers.lock().await.get(&pool).unwrap().clone()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn enqueue(&self, job: FetchJob) -> Result<()> {
        let tx = self.sender_for(job.pool).await;
        tx.send(job).await.context("in-process queue closed")
    }

    async fn dequeue(&self, pool: Pool) -> Result<Option<Delivery>> {
        let rx = self.receiver_for(pool).await;
        let mut rx = rx.lock().await;
        Ok(rx.recv().await.map(|job| Delivery { job, ack: DeliveryAck::None }))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializableJob {
    source_id: String,
    pool: Pool,
    dispatched_at: chrono::DateTime<chrono::Utc>,
}

impl From<&FetchJob> for SerializableJob {
    fn from(job: &FetchJob) -> Self {
        Self {
            source_id: job.source_id.clone(),
            pool: job.pool,
            dispatched_at: job.dispatched_at,
        }
    }
}

impl From<SerializableJob> for FetchJob {
    fn from(job: SerializableJob) -> Self {
        Self {
            source_id: job.source_id,
            pool: job.pool,
            dispatched_at: job.dispatched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(source_id: &str, pool: Pool) -> FetchJob {
        FetchJob { source_id: source_id.to_string(), pool, dispatched_at: Utc::now() }
    }

    #[tokio::test]
    async fn in_process_broker_round_trips_a_job() {
        let broker = InProcessBroker::new(16);
        broker.enqueue(job("diario-oficial", Pool::FastPool)).await.unwrap();
        let delivery = broker.dequeue(Pool::FastPool).await.unwrap().unwrap();
        assert_eq!(delivery.job.source_id, "diario-oficial");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn in_process_broker_keeps_pools_independent() {
        let broker = InProcessBroker::new(16);
        broker.enqueue(job("a", Pool::FastPool)).await.unwrap();
        broker.enqueue(job("b", Pool::HeavyRenderPool)).await.unwrap();

        let fast = broker.dequeue(Pool::FastPool).await.unwrap().unwrap();
        assert_eq!(fast.job.source_id, "a");
        let render = broker.dequeue(Pool::HeavyRenderPool).await.unwrap().unwrap();
        assert_eq!(render.job.source_id, "b");
    }
}
