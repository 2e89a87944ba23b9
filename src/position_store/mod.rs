mod file_store;

pub use file_store::FilePositionStore;

use crate::error::Result;
use crate::model::Position;
use async_trait::async_trait;

/// Durable, atomic read/write of the replication position. `initialize`
/// opens or creates the backing store; `get` returns the last checkpoint (or
/// the configured genesis position if none exists yet); `save` must be
/// atomic and durable on return. The Dispatcher is the sole writer.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait PositionStore: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn get(&self) -> Result<Position>;
    async fn save(&self, position: Position) -> Result<()>;
}
