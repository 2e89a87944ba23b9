use super::DestinationEndpoint;
use crate::error::{Result, TransferError};
use crate::model::{Request, RequestOp};
use async_trait::async_trait;
use redis::AsyncCommands;

/// Maps `Upsert`/`Index` to `SET routing_key payload` and `Delete` to `DEL
/// routing_key`. Each request is applied independently; a mid-batch failure
/// stops the batch and surfaces `PublishFailed` so the Dispatcher retries the
/// whole thing rather than silently skipping rows.
pub struct RedisEndpoint {
    client: redis::Client,
}

impl RedisEndpoint {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TransferError::DestinationUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DestinationEndpoint for RedisEndpoint {
    async fn start(&self) -> Result<()> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransferError::DestinationUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, requests: &[Request]) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransferError::DestinationUnavailable(e.to_string()))?;

        for request in requests {
            match request.op {
                RequestOp::Upsert | RequestOp::Index => {
                    conn.set::<_, _, ()>(&request.routing_key, &request.payload)
                        .await
                        .map_err(|e| TransferError::PublishFailed(e.to_string()))?;
                }
                RequestOp::Delete => {
                    conn.del::<_, ()>(&request.routing_key)
                        .await
                        .map_err(|e| TransferError::PublishFailed(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false),
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        Ok(pong.is_ok())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
