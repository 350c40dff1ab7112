use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOperation {
    Store,
    Retrieve,
    Rotate,
}

impl KeyOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyOperation::Store => "store",
            KeyOperation::Retrieve => "retrieve",
            KeyOperation::Rotate => "rotate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

/// One key-store operation. Metadata never carries secret material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub operation: KeyOperation,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

/// Append-only sink. Delivery is best-effort: sinks swallow their own failures.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        match record.status {
            AuditStatus::Success => info!(
                target: "audit",
                operation = record.operation.as_str(),
                metadata = %record.metadata,
                "keystore.audit"
            ),
            AuditStatus::Failure => warn!(
                target: "audit",
                operation = record.operation.as_str(),
                error = record.error_message.as_deref().unwrap_or(""),
                metadata = %record.metadata,
                "keystore.audit"
            ),
        }
    }
}

/// Delivers each record to every inner sink, in order.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn record(&self, record: AuditRecord) {
        for sink in &self.sinks {
            sink.record(record.clone()).await;
        }
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().await.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fanout_reaches_every_sink() {
        let a = Arc::new(MemoryAuditSink::new());
        let b = Arc::new(MemoryAuditSink::new());
        let sink = FanoutAuditSink::new(vec![
            a.clone() as Arc<dyn AuditSink>,
            Arc::new(TracingAuditSink),
            b.clone(),
        ]);

        sink.record(AuditRecord {
            operation: KeyOperation::Rotate,
            status: AuditStatus::Failure,
            error_message: Some("not found: no active key for wallet 1".into()),
            metadata: json!({ "walletId": 1 }),
        })
        .await;

        assert_eq!(a.records().await.len(), 1);
        assert_eq!(b.records().await[0].operation, KeyOperation::Rotate);
    }

    #[test]
    fn record_serializes_snake_case() {
        let v = serde_json::to_value(AuditRecord {
            operation: KeyOperation::Retrieve,
            status: AuditStatus::Success,
            error_message: None,
            metadata: json!({}),
        })
        .unwrap();
        assert_eq!(v["operation"], "retrieve");
        assert_eq!(v["status"], "success");
    }
}
