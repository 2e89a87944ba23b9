pub mod http_index;
pub mod kafka;
pub mod log_sink;
pub mod redis_sink;

use crate::error::Result;
use crate::model::Request;
use async_trait::async_trait;

/// The destination seam. A Dispatcher holds exactly one
/// `DestinationEndpoint`; `publish` must either fully apply a batch or return
/// an error, never partially — callers retry the whole batch on failure.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait DestinationEndpoint: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn publish(&self, requests: &[Request]) -> Result<()>;
    /// Cheap liveness probe used by the metrics loop to report a
    /// destination-up gauge; must not publish anything.
    async fn ping(&self) -> Result<bool>;
    async fn close(&self) -> Result<()>;
}

pub use http_index::HttpIndexEndpoint;
pub use kafka::KafkaEndpoint;
pub use log_sink::LogEndpoint;
pub use redis_sink::RedisEndpoint;
