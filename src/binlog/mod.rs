pub mod client;

pub use client::MysqlBinlogClient;

use crate::error::Result;
use crate::model::{ChangeEvent, Position};
use crate::rules::TableMeta;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receives decoded row/DDL events as the Binlog Client Adapter produces
/// them. The Handler is the only implementation in this crate; kept as a
/// trait so tests can assert on events without a live connection.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ChangeEvent) -> Result<()>;
}

/// The contract the Transfer Controller drives. The wire protocol itself is
/// `mysql_async`'s; this trait is the seam the rest of the engine programs
/// against so the adapter can be swapped or mocked.
#[async_trait]
pub trait BinlogClient: Send + Sync {
    /// Registers the sink for decoded events. Must be called before
    /// `run_from`.
    fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>);

    /// Narrows replication to these tables within `schema` (literal names or
    /// regex patterns, pre-expansion). Used when every configured rule
    /// targets a single schema, so filtering can happen table-by-table
    /// instead of pulling the whole schema.
    fn add_dump_tables(&mut self, schema: &str, tables: Vec<String>);

    /// Coarser fallback: admits every table in these schemas. Used when rules
    /// span more than one schema, since the wire protocol has no per-table
    /// cross-schema filter.
    fn add_dump_databases(&mut self, schemas: Vec<String>);

    /// Opens a replication stream starting at `position` and runs until
    /// `cancel` fires or the connection fails. Rebuilding the client (a new
    /// `run_from` call) is how pause/resume works: the Registry and Position
    /// Store survive across calls, this adapter does not.
    async fn run_from(&mut self, position: Position, cancel: CancellationToken) -> Result<()>;

    /// Fetches current table metadata directly from the source, bypassing
    /// any Rule cache — used by `RuleRegistry::update_rule` and by tests.
    async fn get_table(&self, schema: &str, table: &str) -> Result<TableMeta>;

    /// Seconds of estimated replication delay, derived from the gap between
    /// wall-clock time and the timestamp of the last event processed.
    async fn get_delay(&self) -> Result<u64>;

    async fn close(&mut self) -> Result<()>;
}
