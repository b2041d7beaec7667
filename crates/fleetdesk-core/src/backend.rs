//! The instance backend contract and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::BackendConfig;
use crate::types::{CopyRequest, HistoryQuery, HistoryRecord, Instance, InstanceQuery, Page};
use crate::{Error, Result};

/// Operations the data-access layer needs from the backend.
///
/// Reads must be idempotent. Errors carry the backend's status where one was
/// received so they can be classified.
#[async_trait]
pub trait InstanceBackend: Send + Sync + 'static {
    async fn list_instances(&self, query: &InstanceQuery) -> Result<Page<Instance>>;

    async fn get_instance(&self, id: i64) -> Result<Instance>;

    async fn get_instance_by_name(&self, name: &str) -> Result<Instance>;

    async fn create_instance(&self, instance: &Instance) -> Result<Instance>;

    async fn update_instance(&self, id: i64, instance: &Instance) -> Result<Instance>;

    async fn delete_instance(&self, id: i64) -> Result<()>;

    async fn copy_instance(&self, request: &CopyRequest) -> Result<Instance>;

    async fn list_history(&self, query: &HistoryQuery) -> Result<Page<HistoryRecord>>;

    async fn get_history(&self, history_id: i64) -> Result<HistoryRecord>;

    /// Most recent history record, `None` when the instance has no history.
    async fn latest_history(&self, instance_id: i64) -> Result<Option<HistoryRecord>>;

    async fn history_count(&self, instance_id: i64) -> Result<u64>;
}

/// Lists arrive either wrapped in a pagination envelope or as a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Envelope(Page<T>),
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_page(self, limit: u32, offset: u32) -> Page<T> {
        match self {
            Self::Envelope(page) => page,
            Self::Bare(records) => Page::from_records(records, limit, offset),
        }
    }
}

#[derive(Deserialize)]
struct HistoryCount {
    count: u64,
}

/// [`InstanceBackend`] over the backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpBackend {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid base URL, or a network error
    /// if the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Self::with_timeout(config, config.timeout())
    }

    /// [`HttpBackend::new`] with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Same as [`HttpBackend::new`].
    pub fn with_timeout(config: &BackendConfig, timeout: Duration) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid backend URL '{}': {e}", config.base_url)))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetdesk/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "backend request");
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(status, response).await)
        }
    }

    async fn fetch<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = Self::send(builder).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn error_from_response(status: StatusCode, response: Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    Error::from_status(status.as_u16(), error_message(status, &body))
}

/// Pull a readable message out of an error body. `{"detail": ...}` bodies
/// yield the detail; other bodies are used verbatim.
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned());
    match detail {
        Some(Value::String(message)) => message,
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match (item.get("loc"), item.get("msg")) {
                (Some(Value::Array(loc)), Some(Value::String(msg))) => {
                    let loc: Vec<String> = loc
                        .iter()
                        .map(|part| match part {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    format!("{}: {msg}", loc.join("."))
                },
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

fn instance_query_params(query: &InstanceQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("skip", query.offset.to_string()),
        ("limit", query.limit.to_string()),
    ];
    let optional = [
        ("name", query.name.clone()),
        ("model_name", query.model_name.clone()),
        ("cluster_name", query.cluster_name.clone()),
        ("status", query.status.map(|s| s.as_str().to_string())),
        ("priority", query.priority.clone()),
    ];
    params.extend(
        optional
            .into_iter()
            .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v))),
    );
    params
}

fn history_query_params(query: &HistoryQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("limit", query.limit.to_string()),
        ("offset", query.offset.to_string()),
    ];
    if let Some(op) = query.operation_type {
        params.push(("operation_type", op.as_str().to_string()));
    }
    if let Some(start) = query.start_date {
        params.push(("start_date", start.to_rfc3339()));
    }
    if let Some(end) = query.end_date {
        params.push(("end_date", end.to_rfc3339()));
    }
    params
}

#[async_trait]
impl InstanceBackend for HttpBackend {
    async fn list_instances(&self, query: &InstanceQuery) -> Result<Page<Instance>> {
        let listing: Listing<Instance> = Self::fetch(
            self.request(Method::GET, "/api/instances/")
                .query(&instance_query_params(query)),
        )
        .await?;
        Ok(listing.into_page(query.limit, query.offset))
    }

    async fn get_instance(&self, id: i64) -> Result<Instance> {
        Self::fetch(self.request(Method::GET, &format!("/api/instances/{id}"))).await
    }

    async fn get_instance_by_name(&self, name: &str) -> Result<Instance> {
        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        Self::fetch(self.request(Method::GET, &format!("/api/instances/name/{encoded}"))).await
    }

    async fn create_instance(&self, instance: &Instance) -> Result<Instance> {
        Self::fetch(self.request(Method::POST, "/api/instances/").json(instance)).await
    }

    async fn update_instance(&self, id: i64, instance: &Instance) -> Result<Instance> {
        Self::fetch(
            self.request(Method::PUT, &format!("/api/instances/{id}"))
                .json(instance),
        )
        .await
    }

    async fn delete_instance(&self, id: i64) -> Result<()> {
        Self::send(self.request(Method::DELETE, &format!("/api/instances/{id}"))).await?;
        Ok(())
    }

    async fn copy_instance(&self, request: &CopyRequest) -> Result<Instance> {
        Self::fetch(self.request(Method::POST, "/api/instances/copy").json(request)).await
    }

    async fn list_history(&self, query: &HistoryQuery) -> Result<Page<HistoryRecord>> {
        let path = match query.instance_id {
            Some(id) => format!("/api/instances/{id}/history"),
            None => "/api/history".to_string(),
        };
        let listing: Listing<HistoryRecord> = Self::fetch(
            self.request(Method::GET, &path)
                .query(&history_query_params(query)),
        )
        .await?;
        Ok(listing.into_page(query.limit, query.offset))
    }

    async fn get_history(&self, history_id: i64) -> Result<HistoryRecord> {
        Self::fetch(self.request(Method::GET, &format!("/api/history/{history_id}"))).await
    }

    async fn latest_history(&self, instance_id: i64) -> Result<Option<HistoryRecord>> {
        let path = format!("/api/instances/{instance_id}/history/latest");
        match Self::fetch(self.request(Method::GET, &path)).await {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn history_count(&self, instance_id: i64) -> Result<u64> {
        let path = format!("/api/instances/{instance_id}/history/count");
        let count: HistoryCount = Self::fetch(self.request(Method::GET, &path)).await?;
        Ok(count.count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{OperationType, Status};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> HttpBackend {
        let config = BackendConfig {
            base_url: server.uri(),
            ..BackendConfig::default()
        };
        HttpBackend::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_list_instances_accepts_bare_array() -> anyhow::Result<()> {
        // Given: The backend returns a plain list
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/instances/"))
            .and(query_param("skip", "0"))
            .and(query_param("limit", "2"))
            .and(query_param("cluster_name", "gpu-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "prod-web-1", "cluster_name": "gpu-a", "status": "active"},
                {"id": 2, "name": "prod-db-4", "cluster_name": "gpu-a", "status": "pending"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        // When: Listing with a filter
        let query = InstanceQuery {
            limit: 2,
            cluster_name: Some("gpu-a".into()),
            ..InstanceQuery::default()
        };
        let page = backend_for(&server).list_instances(&query).await?;

        // Then: It is wrapped in a page
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[1].status, Some(Status::Pending));
        assert!(page.has_more);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_history_accepts_envelope() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/instances/7/history"))
            .and(query_param("operation_type", "update"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 120,
                "history_records": [{
                    "history_id": 3, "original_id": 7, "operation_type": "update",
                    "operation_timestamp": "2024-05-01T12:00:00", "name": "prod-web-1"
                }],
                "limit": 50, "offset": 0, "has_more": true
            })))
            .mount(&server)
            .await;

        let query = HistoryQuery {
            operation_type: Some(OperationType::Update),
            ..HistoryQuery::for_instance(7)
        };
        let page = backend_for(&server).list_history(&query).await?;

        assert_eq!(page.total_count, 120);
        assert_eq!(page.records[0].history_id, 3);
        assert!(page.has_more);
        Ok(())
    }

    #[tokio::test]
    async fn test_404_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/instances/99"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"detail": "Instance with id 99 not found"})),
            )
            .mount(&server)
            .await;

        let err = backend_for(&server).get_instance(99).await.unwrap_err();

        match err {
            Error::NotFound(message) => assert_eq!(message, "Instance with id 99 not found"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_conflict_and_validation_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/instances/copy"))
            .and(body_json(json!({"source_instance_id": 1, "new_name": "dup"})))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"detail": "Instance with name 'dup' already exists"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/instances/"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "detail": [{
                    "loc": ["body", "replicas"],
                    "msg": "must be at least 1",
                    "type": "value_error"
                }]
            })))
            .mount(&server)
            .await;
        let backend = backend_for(&server);

        let conflict = backend
            .copy_instance(&CopyRequest {
                source_instance_id: 1,
                new_name: Some("dup".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(conflict.category(), "conflict");
        assert!(conflict.to_string().contains("already exists"));

        let invalid = backend
            .create_instance(&Instance::new(0, "x"))
            .await
            .unwrap_err();
        assert_eq!(invalid.category(), "validation");
        assert!(invalid.to_string().contains("body.replicas: must be at least 1"));
    }

    #[tokio::test]
    async fn test_latest_history_missing_is_none() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/instances/5/history/latest"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "No history"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/instances/5/history/count"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"instance_id": 5, "count": 0})),
            )
            .mount(&server)
            .await;
        let backend = backend_for(&server);

        assert!(backend.latest_history(5).await?.is_none());
        assert_eq!(backend.history_count(5).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_basic_auth() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/instances/3"))
            .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let config = BackendConfig {
            base_url: format!("{}/", server.uri()),
            username: Some("admin".into()),
            password: Some("secret".into()),
            ..BackendConfig::default()
        };

        HttpBackend::new(&config)?.delete_instance(3).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_without_body_uses_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history/1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = backend_for(&server).get_history(1).await.unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/instances/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 1, "name": "slow"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let config = BackendConfig {
            base_url: server.uri(),
            ..BackendConfig::default()
        };
        let backend = HttpBackend::with_timeout(&config, Duration::from_millis(100)).unwrap();

        let err = backend.get_instance(1).await.unwrap_err();

        assert_eq!(err.category(), "timeout");
        assert!(err.is_transport());
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let config = BackendConfig {
            base_url: "::not a url".into(),
            ..BackendConfig::default()
        };
        assert!(matches!(HttpBackend::new(&config), Err(Error::Config(_))));
    }
}
