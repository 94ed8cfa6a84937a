use std::time::Duration;

use {
    anyhow::Context,
    prost::Message,
    rdkafka::{
        ClientConfig,
        producer::{FutureProducer, FutureRecord},
    },
    tracing::debug,
};

use crate::PushMsg;

/// Producer onto the partitioned log. The record key is the room id, which
/// pins a room's messages to one partition and therefore one consumer.
#[derive(Clone)]
pub struct LogProducer {
    inner: FutureProducer,
    topic: String,
}

impl LogProducer {
    pub fn new(brokers: &str, topic: &str) -> anyhow::Result<Self> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("kafka producer init")?;
        Ok(Self {
            inner,
            topic: topic.to_string(),
        })
    }

    /// Emit one fan-out record. Waits for the broker ack so a failed
    /// produce surfaces to the caller instead of vanishing.
    pub async fn send_room(&self, push: &PushMsg) -> anyhow::Result<()> {
        let payload = push.encode_to_vec();
        let record = FutureRecord::to(&self.topic).key(&push.room).payload(&payload);
        self.inner
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("produce to {} failed: {e}", self.topic))?;
        debug!(room = %push.room, bytes = payload.len(), "record produced");
        Ok(())
    }
}
