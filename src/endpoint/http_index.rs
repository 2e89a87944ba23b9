use super::DestinationEndpoint;
use crate::error::{Result, TransferError};
use crate::model::{Request, RequestOp};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Bulk-indexes requests against an HTTP search/document store (e.g. an
/// Elasticsearch-style `_bulk` endpoint): one NDJSON action line per request,
/// `index`/`delete` chosen from `RequestOp`, POSTed in a single call per
/// batch.
pub struct HttpIndexEndpoint {
    client: Client,
    base_url: String,
}

impl HttpIndexEndpoint {
    pub fn new(base_url: &str, bearer_token: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(token) = bearer_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("Bearer {token}");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&value)
                    .map_err(|e| TransferError::ConfigInvalid(e.to_string()))?,
            );
            builder = builder.default_headers(headers);
        }
        let client = builder
            .build()
            .map_err(|e| TransferError::ConfigInvalid(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DestinationEndpoint for HttpIndexEndpoint {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, requests: &[Request]) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for request in requests {
            let action = match request.op {
                RequestOp::Delete => serde_json::json!({"delete": {"_index": request.target, "_id": request.routing_key}}),
                RequestOp::Upsert | RequestOp::Index => serde_json::json!({"index": {"_index": request.target, "_id": request.routing_key}}),
            };
            body.push_str(&action.to_string());
            body.push('\n');
            if !matches!(request.op, RequestOp::Delete) {
                let doc: Value = serde_json::from_slice(&request.payload).unwrap_or(Value::Null);
                body.push_str(&doc.to_string());
                body.push('\n');
            }
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| TransferError::PublishFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransferError::PublishFailed(format!(
                "bulk index returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        let response = self.client.get(&self.base_url).send().await;
        Ok(response.map(|r| r.status().is_success()).unwrap_or(false))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
