use super::DestinationEndpoint;
use crate::error::{Result, TransferError};
use crate::model::Request;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Publishes each `Request` as one Kafka record, keyed by `routing_key` so
/// rows with the same primary key land on the same partition and preserve
/// per-row ordering.
pub struct KafkaEndpoint {
    producer: FutureProducer,
}

impl KafkaEndpoint {
    pub fn new(brokers: &str, acks: Option<&str>) -> Result<Self> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "30000");
        if let Some(acks) = acks {
            config.set("acks", acks);
        }
        let producer: FutureProducer = config
            .create()
            .map_err(|e| TransferError::DestinationUnavailable(e.to_string()))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl DestinationEndpoint for KafkaEndpoint {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, requests: &[Request]) -> Result<()> {
        for request in requests {
            let record = FutureRecord::to(&request.target)
                .key(&request.routing_key)
                .payload(&request.payload);
            self.producer
                .send(record, Timeout::After(Duration::from_secs(10)))
                .await
                .map_err(|(e, _)| TransferError::PublishFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(self
            .producer
            .client()
            .fetch_metadata(None, Duration::from_secs(5))
            .is_ok())
    }

    async fn close(&self) -> Result<()> {
        self.producer.flush(Duration::from_secs(10)).ok();
        Ok(())
    }
}
