use async_trait::async_trait;
use common::types::Aggregate;
use tokio::sync::mpsc;

/// One record on the processed channel: the aggregate as camelCase JSON,
/// keyed by metric name.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

impl ProcessedMessage {
    pub fn encode(aggregate: &Aggregate) -> anyhow::Result<Self> {
        Ok(Self {
            key: aggregate.metric_name.clone(),
            payload: serde_json::to_vec(aggregate)?,
        })
    }

    pub fn decode(&self) -> anyhow::Result<Aggregate> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Outbound side of the processed channel.
#[async_trait]
pub trait ProcessedPublisher: Send + Sync + 'static {
    async fn publish(&self, aggregate: &Aggregate) -> anyhow::Result<()>;
}

/// In-process transport over a bounded channel. Publishing waits for capacity
/// and fails once the receiving side is gone.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<ProcessedMessage>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProcessedMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProcessedPublisher for ChannelPublisher {
    async fn publish(&self, aggregate: &Aggregate) -> anyhow::Result<()> {
        let message = ProcessedMessage::encode(aggregate)?;
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("Processed channel is closed"))
    }
}

#[cfg(test)]
mod tests {
    use common::types::{
        Aggregate,
        Labels,
        MetricType,
    };

    use super::{
        ChannelPublisher,
        ProcessedPublisher,
    };

    fn aggregate() -> Aggregate {
        Aggregate {
            metric_name: "billing:requests".to_owned(),
            metric_type: MetricType::Counter,
            bucket_timestamp: "2024-01-01T00:00:10Z".parse().unwrap(),
            value: 2.0,
            sketch: vec![1, 0, 7],
            labels: Labels::new(),
        }
    }

    #[tokio::test]
    async fn test_channel_publisher_keys_by_metric() -> anyhow::Result<()> {
        let (publisher, mut rx) = ChannelPublisher::new(4);
        publisher.publish(&aggregate()).await?;
        let message = rx.recv().await.unwrap();
        assert_eq!(message.key, "billing:requests");
        assert_eq!(message.decode()?, aggregate());
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_fails_when_receiver_dropped() {
        let (publisher, rx) = ChannelPublisher::new(1);
        drop(rx);
        assert!(publisher.publish(&aggregate()).await.is_err());
    }
}
