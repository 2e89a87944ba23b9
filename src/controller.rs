use crate::binlog::{BinlogClient, MysqlBinlogClient};
use crate::config::{DestinationConfig, EngineConfig, RuleTemplate};
use crate::dispatch::Dispatcher;
use crate::endpoint::{DestinationEndpoint, HttpIndexEndpoint, KafkaEndpoint, LogEndpoint, RedisEndpoint};
use crate::error::{Result, TransferError};
use crate::handler::Handler;
use crate::metrics;
use crate::model::Position;
use crate::position_store::{FilePositionStore, PositionStore};
use crate::queue::request_queue;
use crate::rules::RuleRegistry;
use mysql_async::{OptsBuilder, Pool};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The lifecycle states the Controller moves through. Collapsed from the
/// original's three independent atomic flags into one state machine guarded
/// by a single lock: illegal combinations like "running and closed" are no
/// longer representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    Running,
    Paused,
    Closed,
}

struct RunningTask {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    binlog: JoinHandle<()>,
    metrics: Option<JoinHandle<()>>,
}

/// Owns every long-lived component and drives `initialize` → `run` →
/// `pause`/`restart` → `close`. Only one `RunningTask` exists at a time;
/// pausing tears it down entirely and resuming builds a fresh one, so the
/// `BinlogClient` never survives a pause while the Registry and Position
/// Store do.
pub struct TransferController {
    config: EngineConfig,
    source_pool: Pool,
    registry: Arc<RuleRegistry>,
    position_store: Arc<dyn PositionStore>,
    endpoint: Arc<dyn DestinationEndpoint>,
    state: Mutex<ControllerState>,
    running: Mutex<Option<RunningTask>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl TransferController {
    pub async fn initialize(config: EngineConfig) -> Result<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.source.host.clone())
            .tcp_port(config.source.port)
            .user(Some(config.source.username.clone()))
            .pass(Some(config.source.password.clone()));
        let source_pool = Pool::new(opts);

        let mut conn = source_pool.get_conn().await.map_err(TransferError::Mysql)?;
        let registry = Arc::new(
            RuleRegistry::compile(&mut conn, &config.rules, config.skip_no_pk_table, &config.data_dir).await?,
        );
        drop(conn);

        let position_store: Arc<dyn PositionStore> =
            Arc::new(FilePositionStore::new(config.data_dir.clone(), Position::genesis()));
        position_store.initialize().await?;

        let endpoint = build_endpoint(&config.destination)?;
        endpoint.start().await?;

        info!(rules = registry.len(), "transfer controller initialized");

        Ok(Self {
            config,
            source_pool,
            registry,
            position_store,
            endpoint,
            state: Mutex::new(ControllerState::Created),
            running: Mutex::new(None),
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    /// The error that caused the engine to stop on its own, if any. Cleared
    /// on the next successful `run`.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    /// Starts (or resumes) replication from the last checkpointed position.
    pub async fn run(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == ControllerState::Running {
            return Ok(());
        }
        if *state == ControllerState::Closed {
            return Err(TransferError::ConfigInvalid("controller is closed".into()));
        }

        *self.last_error.lock().await = None;

        let position = self.position_store.get().await?;
        let cancel = CancellationToken::new();

        let (sender, receiver) = request_queue(self.config.queue_capacity);
        let handler = Arc::new(Handler::new(self.registry.clone(), sender));

        let mut binlog_client = MysqlBinlogClient::new(self.source_pool.clone(), self.config.source.server_id);
        seed_dump_filter(&self.config.rules, &mut binlog_client);
        binlog_client.set_event_handler(handler);

        let binlog_client: Arc<Mutex<Option<Box<dyn BinlogClient>>>> =
            Arc::new(Mutex::new(Some(Box::new(binlog_client))));

        let dispatcher = Dispatcher::new(
            receiver,
            self.endpoint.clone(),
            self.registry.clone(),
            self.position_store.clone(),
            self.source_pool.clone(),
        );
        let dispatcher_cancel = cancel.clone();
        let dispatcher_last_error = self.last_error.clone();
        let dispatcher_task = tokio::spawn(async move {
            if let Err(e) = dispatcher.run(dispatcher_cancel).await {
                *dispatcher_last_error.lock().await = Some(e.to_string());
            }
        });

        let binlog_run_handle = binlog_client.clone();
        let binlog_cancel = cancel.clone();
        let binlog_last_error = self.last_error.clone();
        let binlog_task = tokio::spawn(async move {
            let mut guard = binlog_run_handle.lock().await;
            if let Some(client) = guard.as_mut() {
                if let Err(e) = client.run_from(position, binlog_cancel.clone()).await {
                    warn!(error = %e, "binlog client stopped with error");
                    *binlog_last_error.lock().await = Some(e.to_string());
                    binlog_cancel.cancel();
                }
            }
        });

        let metrics_task = if self.config.is_exporter_enable {
            Some(tokio::spawn(metrics::run(
                self.endpoint.clone(),
                binlog_client,
                std::time::Duration::from_secs(self.config.metrics_interval_secs),
                cancel.clone(),
            )))
        } else {
            None
        };

        *self.running.lock().await = Some(RunningTask {
            cancel,
            dispatcher: dispatcher_task,
            binlog: binlog_task,
            metrics: metrics_task,
        });
        *state = ControllerState::Running;
        Ok(())
    }

    /// Stops the binlog client first, then lets the Dispatcher drain its
    /// queue to empty before it idles.
    pub async fn pause(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != ControllerState::Running {
            return Ok(());
        }

        if let Some(task) = self.running.lock().await.take() {
            task.cancel.cancel();
            task.binlog.await.ok();
            task.dispatcher.await.ok();
            if let Some(metrics) = task.metrics {
                metrics.await.ok();
            }
        }

        *state = ControllerState::Paused;
        Ok(())
    }

    /// Resumes from the last checkpoint with a freshly rebuilt binlog client.
    pub async fn restart(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != ControllerState::Paused {
            return Err(TransferError::ConfigInvalid(
                "restart is only valid from the paused state".into(),
            ));
        }
        *state = ControllerState::Created;
        drop(state);
        self.run().await
    }

    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == ControllerState::Closed {
            return Ok(());
        }

        if let Some(task) = self.running.lock().await.take() {
            task.cancel.cancel();
            task.binlog.await.ok();
            task.dispatcher.await.ok();
            if let Some(metrics) = task.metrics {
                metrics.await.ok();
            }
        }

        self.endpoint.close().await.ok();
        *state = ControllerState::Closed;
        info!("transfer controller closed");
        Ok(())
    }
}

fn build_endpoint(config: &DestinationConfig) -> Result<Arc<dyn DestinationEndpoint>> {
    let endpoint: Arc<dyn DestinationEndpoint> = match config {
        DestinationConfig::Kafka { brokers, acks } => {
            Arc::new(KafkaEndpoint::new(brokers, acks.as_deref())?)
        }
        DestinationConfig::Redis { url } => Arc::new(RedisEndpoint::new(url)?),
        DestinationConfig::HttpIndex { base_url, bearer_token } => {
            Arc::new(HttpIndexEndpoint::new(base_url, bearer_token.as_deref())?)
        }
        DestinationConfig::Log => Arc::new(LogEndpoint),
    };
    Ok(endpoint)
}

/// Seeds the `BinlogClient`'s source-side filter from the raw rule templates
/// (pre-expansion, so a wildcard table pattern like `order_.*` still reaches
/// the filter as a pattern rather than an already-expanded table list). A
/// single target schema gets a precise per-table filter; multiple schemas
/// fall back to admitting each schema wholesale, since the wire protocol has
/// no per-table filter that spans schemas.
fn seed_dump_filter(rules: &[RuleTemplate], binlog_client: &mut MysqlBinlogClient) {
    let schemas: BTreeSet<&str> = rules.iter().map(|r| r.schema.as_str()).collect();

    if schemas.len() == 1 {
        let schema = *schemas.iter().next().expect("checked len == 1");
        let tables: Vec<String> = rules
            .iter()
            .filter(|r| r.schema == schema)
            .map(|r| r.table.clone())
            .collect();
        binlog_client.add_dump_tables(schema, tables);
    } else {
        binlog_client.add_dump_databases(schemas.into_iter().map(str::to_string).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(schema: &str, table: &str) -> RuleTemplate {
        RuleTemplate {
            schema: schema.to_string(),
            table: table.to_string(),
            columns: None,
            topic_template: None,
            key_template: None,
            script_path: None,
        }
    }

    #[test]
    fn single_schema_seeds_precise_table_filter() {
        let rules = vec![template("app", "users"), template("app", "orders")];
        let mut client = MysqlBinlogClient::new(Pool::new("mysql://localhost"), 1);

        seed_dump_filter(&rules, &mut client);

        assert!(client.dump_databases_for_test().is_empty());
        let tables = client.dump_tables_for_test().get("app").unwrap();
        assert_eq!(tables.len(), 2);
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"orders".to_string()));
    }

    #[test]
    fn multiple_schemas_seed_whole_schema_filter() {
        let rules = vec![template("app", "users"), template("billing", "invoices")];
        let mut client = MysqlBinlogClient::new(Pool::new("mysql://localhost"), 1);

        seed_dump_filter(&rules, &mut client);

        assert!(client.dump_tables_for_test().is_empty());
        let schemas = client.dump_databases_for_test();
        assert_eq!(schemas.len(), 2);
        assert!(schemas.contains(&"app".to_string()));
        assert!(schemas.contains(&"billing".to_string()));
    }
}
