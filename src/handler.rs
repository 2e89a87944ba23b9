use crate::binlog::EventHandler;
use crate::error::Result;
use crate::model::{ChangeEvent, EventKind, QueueItem, Request, RequestOp, RowImage};
use crate::queue::RequestSender;
use crate::rules::{Rule, RuleRegistry};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, trace, warn};

/// Turns decoded `ChangeEvent`s into `Request`s and enqueues them. Never
/// touches a `DestinationEndpoint` directly — all I/O happens on the
/// Dispatcher side of the queue, which is what lets the Dispatcher order
/// publishes against position advances.
pub struct Handler {
    registry: Arc<RuleRegistry>,
    sender: RequestSender,
}

impl Handler {
    pub fn new(registry: Arc<RuleRegistry>, sender: RequestSender) -> Self {
        Self { registry, sender }
    }

    fn build_requests(&self, rule: &Rule, event: &ChangeEvent) -> Result<Vec<Request>> {
        let rows: Vec<(Option<RowImage>, Option<RowImage>, RequestOp)> = match event.kind {
            EventKind::Insert => vec![(None, event.after.clone(), RequestOp::Upsert)],
            EventKind::Update => vec![(event.before.clone(), event.after.clone(), RequestOp::Upsert)],
            EventKind::Delete => vec![(event.before.clone(), None, RequestOp::Delete)],
            EventKind::Ddl => return Ok(Vec::new()),
        };

        let mut requests = Vec::new();
        for (before, after, default_op) in rows {
            let output_rows = if let Some(script) = &rule.script {
                script.transform(before.as_ref(), after.as_ref())?
            } else {
                after.clone().or_else(|| before.clone()).into_iter().collect()
            };

            for row in output_rows {
                let projected = project_columns(&row, &rule.projected_columns);
                let routing_key = render_template(&rule.key_template, rule, &projected);
                let target = render_template(&rule.topic_template, rule, &projected);
                let payload = serde_json::to_vec(&projected).unwrap_or_default();

                requests.push(Request::new(target, routing_key, payload, default_op, event.position.clone()));
            }
        }
        Ok(requests)
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn handle(&self, event: ChangeEvent) -> Result<()> {
        match event.kind {
            EventKind::Ddl => {
                if let Some(statement) = &event.ddl_statement {
                    if let Some((schema, table)) = extract_ddl_target(statement, &event.schema) {
                        trace!(%schema, %table, "ddl event observed");
                        self.sender
                            .send(QueueItem::MetadataRefresh { schema, table })
                            .await
                            .ok();
                        return Ok(());
                    }
                }
                self.sender
                    .send(QueueItem::PositionAdvance(event.position))
                    .await
                    .ok();
                Ok(())
            }
            _ => {
                let Some(rule) = self.registry.get(&event.schema, &event.table) else {
                    trace!(schema = %event.schema, table = %event.table, "no rule, dropping event");
                    return Ok(());
                };

                let requests = self.build_requests(&rule, &event)?;
                if requests.is_empty() {
                    debug!(rule = %rule.full_name(), "transform produced no rows");
                } else {
                    self.sender.send(QueueItem::Requests(requests)).await.ok();
                }
                Ok(())
            }
        }
    }
}

fn project_columns(row: &RowImage, columns: &[String]) -> RowImage {
    let mut projected = RowImage::new();
    for column in columns {
        if let Some(value) = row.get(column) {
            projected.insert(column.clone(), value.clone());
        }
    }
    projected
}

fn render_template(template: &str, rule: &Rule, row: &RowImage) -> String {
    let mut out = template.to_string();
    out = out.replace("{schema}", &rule.schema);
    out = out.replace("{table}", &rule.table);

    if out.contains("{pk}") {
        let pk_value = rule
            .table_meta
            .primary_key_columns()
            .iter()
            .map(|f| row.get(&f.name).map(|v| v.as_text_lossy()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("-");
        out = out.replace("{pk}", &pk_value);
    }

    for (column, value) in row {
        let placeholder = format!("{{col:{column}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &value.as_text_lossy());
        }
    }
    out
}

fn ddl_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\b(?:ALTER|DROP|RENAME|TRUNCATE)\s+TABLE\s+`?(?:(?P<schema>[\w$]+)`?\.)?`?(?P<table>[\w$]+)`?")
            .expect("static DDL regex is valid")
    })
}

fn extract_ddl_target(statement: &str, default_schema: &str) -> Option<(String, String)> {
    let caps = ddl_table_regex().captures(statement)?;
    let schema = caps
        .name("schema")
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_schema.to_string());
    let table = caps.name("table")?.as_str().to_string();
    if schema.is_empty() {
        warn!(%statement, "DDL statement has no resolvable schema");
        return None;
    }
    Some((schema, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnValue;
    use crate::queue::request_queue;
    use crate::rules::{FieldMeta, Rule, RuleRegistry, TableMeta};
    use std::collections::HashMap;
    use std::time::Duration;

    fn users_rule() -> Rule {
        let table_meta = TableMeta {
            schema: "app".to_string(),
            table: "users".to_string(),
            fields: vec![
                FieldMeta { name: "id".to_string(), type_name: "int".to_string(), is_primary_key: true },
                FieldMeta { name: "name".to_string(), type_name: "varchar".to_string(), is_primary_key: false },
            ],
        };
        Rule {
            schema: "app".to_string(),
            table: "users".to_string(),
            table_meta,
            composite_key: false,
            projected_columns: vec!["id".to_string(), "name".to_string()],
            topic_template: "app.users".to_string(),
            key_template: "{pk}".to_string(),
            script: None,
            skip_no_pk: false,
        }
    }

    fn handler_with_users_rule() -> (Handler, crate::queue::RequestReceiver) {
        let mut rules = HashMap::new();
        let rule = users_rule();
        rules.insert(rule.full_name(), rule);
        let registry = Arc::new(RuleRegistry::for_test(rules));
        let (sender, receiver) = request_queue(8);
        (Handler::new(registry, sender), receiver)
    }

    fn insert_event(id: i64, name: &str) -> ChangeEvent {
        let mut row = RowImage::new();
        row.insert("id".to_string(), ColumnValue::Int(id));
        row.insert("name".to_string(), ColumnValue::Text(name.to_string()));
        ChangeEvent {
            kind: EventKind::Insert,
            schema: "app".to_string(),
            table: "users".to_string(),
            before: None,
            after: Some(row),
            position: crate::model::Position::genesis(),
            server_timestamp: chrono::Utc::now(),
            ddl_statement: None,
        }
    }

    #[tokio::test]
    async fn insert_event_produces_upsert_request_keyed_by_primary_key() {
        let (handler, mut receiver) = handler_with_users_rule();
        handler.handle(insert_event(1, "ada")).await.unwrap();

        match receiver.recv().await.unwrap() {
            QueueItem::Requests(requests) => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].routing_key, "1");
                assert_eq!(requests[0].target, "app.users");
                assert_eq!(requests[0].op, RequestOp::Upsert);
            }
            other => panic!("expected Requests, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_for_unknown_table_is_dropped() {
        let (handler, mut receiver) = handler_with_users_rule();
        let mut unrelated = insert_event(1, "ada");
        unrelated.table = "orders".to_string();
        handler.handle(unrelated).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await;
        assert!(result.is_err(), "no request should have been enqueued");
    }

    #[tokio::test]
    async fn ddl_event_enqueues_metadata_refresh() {
        let (handler, mut receiver) = handler_with_users_rule();
        let event = ChangeEvent {
            kind: EventKind::Ddl,
            schema: "app".to_string(),
            table: String::new(),
            before: None,
            after: None,
            position: crate::model::Position::genesis(),
            server_timestamp: chrono::Utc::now(),
            ddl_statement: Some("ALTER TABLE `app`.`users` ADD COLUMN age INT".to_string()),
        };
        handler.handle(event).await.unwrap();

        match receiver.recv().await.unwrap() {
            QueueItem::MetadataRefresh { schema, table } => {
                assert_eq!(schema, "app");
                assert_eq!(table, "users");
            }
            other => panic!("expected MetadataRefresh, got {other:?}"),
        }
    }

    #[test]
    fn extracts_schema_and_table_from_alter() {
        let (schema, table) =
            extract_ddl_target("ALTER TABLE `app`.`users` ADD COLUMN foo INT", "").unwrap();
        assert_eq!(schema, "app");
        assert_eq!(table, "users");
    }

    #[test]
    fn falls_back_to_default_schema_when_unqualified() {
        let (schema, table) = extract_ddl_target("ALTER TABLE `users` ADD COLUMN foo INT", "app").unwrap();
        assert_eq!(schema, "app");
        assert_eq!(table, "users");
    }
}
