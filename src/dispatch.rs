use crate::endpoint::DestinationEndpoint;
use crate::error::Result;
use crate::model::QueueItem;
use crate::position_store::PositionStore;
use crate::queue::RequestReceiver;
use crate::rules::RuleRegistry;
use mysql_async::Pool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The single queue consumer. Owns the destination publish, the registry
/// refresh, and the position checkpoint — in that order per item — so a
/// crash between publish and checkpoint only ever causes re-delivery, never
/// silent data loss.
pub struct Dispatcher {
    receiver: RequestReceiver,
    endpoint: Arc<dyn DestinationEndpoint>,
    registry: Arc<RuleRegistry>,
    position_store: Arc<dyn PositionStore>,
    source_pool: Pool,
}

impl Dispatcher {
    pub fn new(
        receiver: RequestReceiver,
        endpoint: Arc<dyn DestinationEndpoint>,
        registry: Arc<RuleRegistry>,
        position_store: Arc<dyn PositionStore>,
        source_pool: Pool,
    ) -> Self {
        Self {
            receiver,
            endpoint,
            registry,
            position_store,
            source_pool,
        }
    }

    /// Drains the queue until `cancel` fires. On pause, the Controller closes
    /// the `BinlogClient` first; this loop then drains whatever is already
    /// queued and idles on `recv()`, so cancellation can still interrupt it
    /// mid-drain rather than forcing a full flush.
    ///
    /// A publish or position-save failure is fatal: it cancels `cancel` and
    /// returns the error so the Controller can observe it, since exactly-once
    /// delivery depends on never advancing the position past a Request that
    /// failed to land. A metadata-refresh failure is not: the affected rule
    /// just keeps serving its previous metadata until the next DDL retriggers
    /// a refresh.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher cancelled");
                    return Ok(());
                }
                item = self.receiver.recv() => item,
            };

            let Some(item) = item else {
                info!("request queue closed, dispatcher exiting");
                return Ok(());
            };

            if let QueueItem::MetadataRefresh { schema, table } = item {
                if let Err(e) = self.refresh_metadata(&schema, &table).await {
                    warn!(%schema, %table, error = %e, "failed to refresh rule metadata");
                }
                continue;
            }

            if let Err(e) = self.handle_item(item).await {
                error!(error = %e, "dispatcher failed to process queue item, cancelling engine");
                cancel.cancel();
                return Err(e);
            }
        }
    }

    async fn handle_item(&mut self, item: QueueItem) -> Result<()> {
        match item {
            QueueItem::Requests(requests) => {
                if requests.is_empty() {
                    return Ok(());
                }
                self.endpoint.publish(&requests).await?;
                if let Some(last) = requests.last() {
                    self.position_store.save(last.origin.clone()).await?;
                }
                debug!(count = requests.len(), "published batch");
                Ok(())
            }
            QueueItem::PositionAdvance(position) => self.position_store.save(position).await,
            QueueItem::MetadataRefresh { .. } => unreachable!("handled in run() before dispatch"),
        }
    }

    async fn refresh_metadata(&self, schema: &str, table: &str) -> Result<()> {
        let mut conn = self.source_pool.get_conn().await.map_err(crate::error::TransferError::Mysql)?;
        self.registry.update_rule(&mut conn, schema, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MockDestinationEndpoint;
    use crate::error::TransferError;
    use crate::model::{Position, Request, RequestOp};
    use crate::position_store::MockPositionStore;
    use crate::queue::request_queue;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_dispatcher(
        endpoint: MockDestinationEndpoint,
        position_store: MockPositionStore,
    ) -> (Dispatcher, crate::queue::RequestSender) {
        let (sender, receiver) = request_queue(16);
        let registry = Arc::new(RuleRegistry::for_test(HashMap::new()));
        let dispatcher = Dispatcher::new(
            receiver,
            Arc::new(endpoint),
            registry,
            Arc::new(position_store),
            Pool::new("mysql://localhost"),
        );
        (dispatcher, sender)
    }

    fn sample_request() -> Request {
        Request::new(
            "topic",
            "key",
            b"{}".to_vec(),
            RequestOp::Upsert,
            Position::new("mysql-bin.000001", 10),
        )
    }

    #[tokio::test]
    async fn publish_failure_cancels_and_returns_error() {
        let mut endpoint = MockDestinationEndpoint::new();
        endpoint
            .expect_publish()
            .returning(|_| Box::pin(async { Err(TransferError::PublishFailed("kafka down".into())) }));
        let position_store = MockPositionStore::new();

        let (dispatcher, sender) = test_dispatcher(endpoint, position_store);
        let cancel = CancellationToken::new();

        sender
            .send(QueueItem::Requests(vec![sample_request()]))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(cancel.clone()))
            .await
            .expect("dispatcher should not hang");

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn position_persist_failure_cancels_and_returns_error() {
        let endpoint = MockDestinationEndpoint::new();
        let mut position_store = MockPositionStore::new();
        position_store
            .expect_save()
            .returning(|_| Box::pin(async { Err(TransferError::PositionPersistFailed("disk full".into())) }));

        let (dispatcher, sender) = test_dispatcher(endpoint, position_store);
        let cancel = CancellationToken::new();

        sender
            .send(QueueItem::PositionAdvance(Position::new("mysql-bin.000001", 20)))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(cancel.clone()))
            .await
            .expect("dispatcher should not hang");

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn successful_batch_does_not_cancel_and_exits_clean_on_queue_close() {
        let mut endpoint = MockDestinationEndpoint::new();
        endpoint.expect_publish().returning(|_| Box::pin(async { Ok(()) }));
        let mut position_store = MockPositionStore::new();
        position_store.expect_save().returning(|_| Box::pin(async { Ok(()) }));

        let (dispatcher, sender) = test_dispatcher(endpoint, position_store);
        let cancel = CancellationToken::new();

        sender
            .send(QueueItem::Requests(vec![sample_request()]))
            .await
            .unwrap();
        drop(sender);

        let result = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(cancel.clone()))
            .await
            .expect("dispatcher should not hang");

        assert!(result.is_ok());
        assert!(!cancel.is_cancelled());
    }
}
