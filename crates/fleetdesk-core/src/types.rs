//! Records exchanged with the instance backend.
//!
//! These mirror the backend's JSON representation closely enough to round-trip
//! it, but every field the console does not strictly need is optional so a
//! schema drift on the backend does not break list pages.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::filter::Filterable;
use crate::search::{FieldValue, Searchable};

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Serving traffic.
    Active,
    /// Configured but stopped.
    Inactive,
    /// Waiting to be scheduled.
    Pending,
    /// Failed.
    Error,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl Status {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Pending => "pending",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Kind of change recorded in an instance's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Instance was created.
    Create,
    /// Instance was modified.
    Update,
    /// Instance was removed.
    Delete,
    /// Instance was restored from an earlier snapshot.
    Rollback,
    /// Any operation this client does not know about.
    #[serde(other)]
    Unknown,
}

impl OperationType {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Rollback => "rollback",
            Self::Unknown => "unknown",
        }
    }
}

/// A named inference workload configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distill_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m405_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<String>,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub image_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_workers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i64>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub priorities: Vec<String>,
    /// Environment variables, normally an object; older records may hold a list.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub envs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Legacy column name for `description`.
    #[serde(default, skip_serializing)]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_min_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cuda_graph: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_concurrency: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Minimal instance, mostly useful in tests and for building create payloads.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Description, falling back to the legacy `desc` column.
    pub fn description_text(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .or(self.desc.as_deref())
            .unwrap_or("")
    }

    /// Effective priority: the first entry of `priorities`, `normal` when unset.
    pub fn priority(&self) -> &str {
        self.priorities.first().map_or("normal", String::as_str)
    }
}

/// Immutable snapshot of an instance taken when it changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history_id: i64,
    pub original_id: i64,
    pub operation_type: OperationType,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub operation_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub snapshot: Instance,
}

/// A page of records plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(alias = "history_records", alias = "instances")]
    pub records: Vec<T>,
    pub total_count: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Wrap a bare list returned by an endpoint without an envelope.
    ///
    /// The total is a lower bound; a full page is assumed to have more.
    pub fn from_records(records: Vec<T>, limit: u32, offset: u32) -> Self {
        let len = u32::try_from(records.len()).unwrap_or(u32::MAX);
        Self {
            total_count: u64::from(offset) + u64::from(len),
            has_more: limit > 0 && len >= limit,
            records,
            limit,
            offset,
        }
    }
}

/// Filters and pagination for instance listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceQuery {
    pub limit: u32,
    pub offset: u32,
    /// Partial name match.
    pub name: Option<String>,
    pub model_name: Option<String>,
    pub cluster_name: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<String>,
}

impl Default for InstanceQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            name: None,
            model_name: None,
            cluster_name: None,
            status: None,
            priority: None,
        }
    }
}

/// Filters and pagination for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Restrict to one instance's history.
    pub instance_id: Option<i64>,
    pub limit: u32,
    pub offset: u32,
    pub operation_type: Option<OperationType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            instance_id: None,
            limit: 50,
            offset: 0,
            operation_type: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl HistoryQuery {
    /// History of a single instance.
    pub fn for_instance(instance_id: i64) -> Self {
        Self {
            instance_id: Some(instance_id),
            ..Self::default()
        }
    }
}

/// Body of a copy request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRequest {
    pub source_instance_id: i64,
    /// Name for the copy; the backend derives one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept RFC 3339 timestamps as well as the naive UTC timestamps the backend
/// emits (`2024-05-01T12:00:00.123456`).
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

fn opt_text(value: Option<&str>) -> FieldValue<'_> {
    value.map_or(FieldValue::Missing, FieldValue::Text)
}

impl Searchable for Instance {
    fn searchable_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("name", FieldValue::Text(&self.name)),
            ("model_name", FieldValue::Text(&self.model_name)),
            ("cluster_name", FieldValue::Text(&self.cluster_name)),
            ("description", FieldValue::Text(self.description_text())),
            ("image_tag", FieldValue::Text(&self.image_tag)),
            ("checkpoint_path", opt_text(self.checkpoint_path.as_deref())),
            ("model_version", opt_text(self.model_version.as_deref())),
            ("pipeline_mode", opt_text(self.pipeline_mode.as_deref())),
            ("nonce", opt_text(self.nonce.as_deref())),
            ("status", opt_text(self.status.map(Status::as_str))),
            ("priorities", FieldValue::List(&self.priorities)),
            ("envs", FieldValue::Json(&self.envs)),
        ]
    }
}

impl Filterable for Instance {
    fn values(&self, field: &str) -> Vec<String> {
        let single = |v: &str| {
            if v.is_empty() {
                Vec::new()
            } else {
                vec![v.to_string()]
            }
        };
        match field {
            "id" => vec![self.id.to_string()],
            "priority" => single(self.priority()),
            "priorities" => self.priorities.clone(),
            _ => self
                .searchable_fields()
                .into_iter()
                .find(|(name, _)| *name == field)
                .map(|(_, value)| single(&value.to_text()))
                .unwrap_or_default(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn number(&self, field: &str) -> Option<f64> {
        let value = match field {
            "id" => Some(self.id),
            "fps" => self.fps,
            "pp" => self.pp,
            "cp" => self.cp,
            "tp" => self.tp,
            "n_workers" => self.n_workers,
            "replicas" => self.replicas,
            "task_concurrency" => self.task_concurrency,
            "ephemeral_min_period_seconds" => self.ephemeral_min_period_seconds,
            _ => None,
        };
        value.map(|v| v as f64)
    }

    fn flag(&self, field: &str) -> Option<bool> {
        match field {
            "quant_mode" => self.quant_mode,
            "distill_mode" => self.distill_mode,
            "m405_mode" => self.m405_mode,
            "ephemeral" => self.ephemeral,
            "enable_cuda_graph" => self.enable_cuda_graph,
            _ => None,
        }
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match field {
            "created_at" => self.created_at,
            "updated_at" => self.updated_at,
            _ => None,
        }
    }
}

impl Searchable for HistoryRecord {
    fn searchable_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        let mut fields = self.snapshot.searchable_fields();
        fields.push((
            "operation_type",
            FieldValue::Text(self.operation_type.as_str()),
        ));
        fields
    }
}

impl Filterable for HistoryRecord {
    fn values(&self, field: &str) -> Vec<String> {
        match field {
            "operation_type" => vec![self.operation_type.as_str().to_string()],
            "history_id" => vec![self.history_id.to_string()],
            "original_id" => vec![self.original_id.to_string()],
            _ => self.snapshot.values(field),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn number(&self, field: &str) -> Option<f64> {
        match field {
            "history_id" => Some(self.history_id as f64),
            "original_id" => Some(self.original_id as f64),
            _ => self.snapshot.number(field),
        }
    }

    fn flag(&self, field: &str) -> Option<bool> {
        self.snapshot.flag(field)
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match field {
            "operation_timestamp" => self.operation_timestamp,
            _ => self.snapshot.timestamp(field),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_accepts_backend_shape() {
        // Given: The backend's instance payload with both desc and description
        let payload = json!({
            "id": 7,
            "name": "prod-web-1",
            "model_name": "llama",
            "cluster_name": "gpu-a",
            "image_tag": "v1.2",
            "priorities": ["high", "normal"],
            "envs": [{"KEY": "VALUE"}],
            "desc": "legacy",
            "description": "",
            "status": "active",
            "created_at": "2024-05-01T12:00:00.123456",
            "updated_at": null
        });

        // When: Deserializing
        let instance: Instance = serde_json::from_value(payload).unwrap();

        // Then: Legacy fields and naive timestamps are handled
        assert_eq!(instance.description_text(), "legacy");
        assert_eq!(instance.priority(), "high");
        assert_eq!(instance.status, Some(Status::Active));
        assert!(instance.created_at.is_some());
        assert!(instance.updated_at.is_none());
    }

    #[test]
    fn test_unknown_status_does_not_fail() {
        let instance: Instance =
            serde_json::from_value(json!({"name": "x", "status": "draining"})).unwrap();
        assert_eq!(instance.status, Some(Status::Unknown));
    }

    #[test]
    fn test_history_page_envelope() {
        let payload = json!({
            "total_count": 1,
            "history_records": [{
                "history_id": 3,
                "original_id": 7,
                "operation_type": "update",
                "operation_timestamp": "2024-05-01T12:00:00Z",
                "name": "prod-web-1",
                "model_name": "llama",
                "cluster_name": "gpu-a",
                "image_tag": "v1.2",
                "envs": {"KEY": "VALUE"}
            }],
            "limit": 50,
            "offset": 0,
            "has_more": false
        });

        let page: Page<HistoryRecord> = serde_json::from_value(payload).unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].operation_type, OperationType::Update);
        assert_eq!(page.records[0].snapshot.name, "prod-web-1");
        assert!(page.records[0].snapshot.envs.is_object());
    }

    #[test]
    fn test_page_from_bare_records() {
        let page = Page::from_records(vec![1, 2, 3], 3, 6);
        assert_eq!(page.total_count, 9);
        assert!(page.has_more);

        let short = Page::from_records(vec![1], 3, 0);
        assert!(!short.has_more);
    }

    #[test]
    fn test_filterable_values_for_history() {
        let record = HistoryRecord {
            history_id: 1,
            original_id: 2,
            operation_type: OperationType::Delete,
            operation_timestamp: None,
            snapshot: Instance {
                cluster_name: "gpu-b".into(),
                replicas: Some(4),
                ..Instance::new(2, "batch-7")
            },
        };

        assert_eq!(record.values("operation_type"), vec!["delete".to_string()]);
        assert_eq!(record.values("cluster_name"), vec!["gpu-b".to_string()]);
        assert_eq!(record.number("replicas"), Some(4.0));
        assert!(record.values("nonce").is_empty());
    }
}
