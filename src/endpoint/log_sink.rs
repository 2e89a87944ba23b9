use super::DestinationEndpoint;
use crate::error::Result;
use crate::model::Request;
use async_trait::async_trait;
use tracing::info;

/// Writes every request to the structured log instead of a real sink. Used
/// for local development and as the default in integration tests, the same
/// role `akkw-mini-canal`'s stdout demo client plays there.
#[derive(Debug, Default)]
pub struct LogEndpoint;

#[async_trait]
impl DestinationEndpoint for LogEndpoint {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, requests: &[Request]) -> Result<()> {
        for request in requests {
            info!(
                target = %request.target,
                routing_key = %request.routing_key,
                op = ?request.op,
                bytes = request.payload.len(),
                "publish"
            );
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
