//! HTTP gateway over the remote authority's POST-style RPC endpoints.
//!
//! Every endpoint is a JSON POST under one base URL. Transient upstream
//! failures (502/503/504 and connection-level errors) are retried with
//! exponential backoff, including the non-idempotent commit endpoint; a 4xx
//! is never retried and surfaces the server-provided message immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::record::{Operation, RecordKey, RecordMap, Table};

use super::{
    CollectionQuery, CollectionQueryResult, RecordGateway, SearchRequest, SearchResponse,
};

const VERSION_HEADER: &str = "X-Api-Version";
const RETRYABLE_STATUSES: [u16; 3] = [502, 503, 504];

pub struct HttpGateway {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    api_version: String,
    retry_attempts: u32,
    retry_base_backoff: Duration,
}

#[derive(Serialize)]
struct RecordRequest<'a> {
    table: &'a Table,
    id: &'a str,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordValuesResponse {
    #[serde(default)]
    record_map: RecordMap,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::configuration(
                "base_url must be set to use the HTTP gateway",
            ));
        }
        let base_url = Url::parse(&config.base_url)
            .map_err(|err| Error::configuration(format!("invalid base_url: {err}")))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| Error::configuration(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
            api_version: config.api_version.clone(),
            retry_attempts: config.retry_attempts_non_zero(),
            retry_base_backoff: config.retry_base_backoff(),
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base_url
            .join(name)
            .map_err(|err| Error::configuration(format!("invalid endpoint `{name}`: {err}")))
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &impl Serialize) -> Result<T> {
        let url = self.endpoint(endpoint)?;
        let mut last_failure = String::new();

        for attempt in 1..=self.retry_attempts {
            if attempt > 1 {
                let backoff = self.retry_base_backoff * 2u32.saturating_pow(attempt - 2);
                tokio::time::sleep(backoff).await;
            }

            let sent = self
                .http
                .post(url.clone())
                .bearer_auth(&self.token)
                .header(VERSION_HEADER, &self.api_version)
                .json(body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    warn!(endpoint, attempt, error = %err, "request failed; retrying");
                    last_failure = err.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(|err| {
                    Error::transport(format!("malformed response from `{endpoint}`: {err}"), attempt)
                });
            }
            if status.is_client_error() {
                let message = rejection_message(response).await;
                return Err(Error::request_rejected(status.as_u16(), message));
            }
            if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                warn!(
                    endpoint,
                    status = status.as_u16(),
                    attempt,
                    "transient upstream failure; retrying"
                );
                last_failure = format!("status {status}");
                continue;
            }
            return Err(Error::transport(
                format!("`{endpoint}` failed with status {status}"),
                attempt,
            ));
        }

        Err(Error::transport(
            format!("`{endpoint}` exhausted retries: {last_failure}"),
            self.retry_attempts,
        ))
    }
}

async fn rejection_message(response: reqwest::Response) -> String {
    let status = response.status();
    let fallback = || format!("request failed with status {status}");
    match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(fallback),
        Err(_) => fallback(),
    }
}

#[async_trait]
impl RecordGateway for HttpGateway {
    async fn get_record_values(&self, requests: &[RecordKey], limit: usize) -> Result<RecordMap> {
        let requests: Vec<RecordRequest<'_>> = requests
            .iter()
            .map(|key| RecordRequest {
                table: &key.table,
                id: &key.id,
            })
            .collect();
        let body = json!({ "requests": requests, "limit": limit });
        let response: RecordValuesResponse = self.post("getRecordValues", &body).await?;
        Ok(response.record_map)
    }

    async fn submit_transaction(&self, operations: &[Operation]) -> Result<()> {
        let body = json!({ "operations": operations });
        match self.post::<serde_json::Value>("submitTransaction", &body).await {
            Ok(_) => Ok(()),
            Err(Error::RequestRejected { message, .. }) => {
                Err(Error::transaction_rejected(message, operations.to_vec()))
            }
            Err(err) => Err(err),
        }
    }

    async fn query_collection(&self, query: &CollectionQuery) -> Result<CollectionQueryResult> {
        self.post("queryCollection", query).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.post("search", request).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn gateway(server: &MockServer) -> HttpGateway {
        let config = ClientConfig {
            base_url: format!("{}/", server.base_url()),
            retry_base_backoff_ms: 1,
            ..Default::default()
        };
        HttpGateway::new(&config, "test-token").expect("gateway builds")
    }

    #[tokio::test]
    async fn fetch_decodes_record_map() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/getRecordValues")
                    .header("authorization", "Bearer test-token")
                    .header(VERSION_HEADER, "2022-06-28");
                then.status(200).json_body(json!({
                    "recordMap": {
                        "block": {
                            "b1": { "value": { "id": "b1" }, "version": 4 }
                        }
                    }
                }));
            })
            .await;

        let gateway = gateway(&server);
        let map = gateway
            .get_record_values(&[RecordKey::new("block", "b1")], 100)
            .await
            .expect("fetch succeeds");

        mock.assert_async().await;
        let record = map
            .get(&Table::block(), "b1")
            .and_then(|entry| entry.as_ref())
            .expect("record present");
        assert_eq!(record.version, 4);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_the_retry_budget() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/getRecordValues");
                then.status(503);
            })
            .await;

        let gateway = gateway(&server);
        let err = gateway
            .get_record_values(&[RecordKey::new("block", "b1")], 100)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { attempts: 5, .. }));
        assert_eq!(mock.hits_async().await, 5);
    }

    #[tokio::test]
    async fn client_errors_are_never_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/getRecordValues");
                then.status(400)
                    .json_body(json!({ "message": "unknown table" }));
            })
            .await;

        let gateway = gateway(&server);
        let err = gateway
            .get_record_values(&[RecordKey::new("bogus", "x")], 100)
            .await
            .unwrap_err();

        assert_eq!(mock.hits_async().await, 1);
        let Error::RequestRejected { status, message } = err else {
            panic!("expected RequestRejected, got {err:?}");
        };
        assert_eq!(status, 400);
        assert_eq!(message, "unknown table");
    }

    #[tokio::test]
    async fn rejected_commit_carries_the_payload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/submitTransaction");
                then.status(400)
                    .json_body(json!({ "message": "invalid operation" }));
            })
            .await;

        let gateway = gateway(&server);
        let ops = vec![Operation::set("block", "b1", Vec::new(), json!({}))];
        let err = gateway.submit_transaction(&ops).await.unwrap_err();

        let Error::TransactionRejected { message, operations } = err else {
            panic!("expected TransactionRejected, got {err:?}");
        };
        assert_eq!(message, "invalid operation");
        assert_eq!(operations, ops);
    }

    #[tokio::test]
    async fn successful_commit_returns_unit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/submitTransaction")
                    .json_body_includes(r#"{"operations":[{"table":"block","id":"b1","command":"set"}]}"#);
                then.status(200).json_body(json!({}));
            })
            .await;

        let gateway = gateway(&server);
        let ops = vec![Operation::set("block", "b1", Vec::new(), json!({}))];
        gateway.submit_transaction(&ops).await.expect("commit succeeds");
        mock.assert_async().await;
    }

    #[test]
    fn missing_base_url_is_a_configuration_error() {
        let err = HttpGateway::new(&ClientConfig::default(), "token")
            .err()
            .expect("gateway must refuse an empty base_url");
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
