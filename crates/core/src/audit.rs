use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::tool::ExecutionResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Executed,
    Failed,
    Denied,
    Rejected,
    PendingApproval,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Denied => "denied",
            Self::Rejected => "rejected",
            Self::PendingApproval => "pending_approval",
        }
    }
}

/// One attempted tool execution. Entries are created once and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub entry_id: String,
    pub tool_name: String,
    pub principal_id: String,
    pub params: Map<String, Value>,
    pub result: ExecutionResult,
    pub success: bool,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(
        tool_name: impl Into<String>,
        principal_id: impl Into<String>,
        params: Map<String, Value>,
        result: ExecutionResult,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            principal_id: principal_id.into(),
            params,
            success: result.success,
            result,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

pub trait AuditSink: Send + Sync {
    fn write(&self, entry: ExecutionLogEntry) -> Result<(), AuditError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    entries: Arc<Mutex<Vec<ExecutionLogEntry>>>,
}

impl InMemoryAuditSink {
    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn entries_for(&self, tool_name: &str) -> Vec<ExecutionLogEntry> {
        self.entries().into_iter().filter(|entry| entry.tool_name == tool_name).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn write(&self, entry: ExecutionLogEntry) -> Result<(), AuditError> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}

/// Emits each entry as a structured `tracing` event. Used when no durable
/// store is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, entry: ExecutionLogEntry) -> Result<(), AuditError> {
        tracing::info!(
            event_name = "dispatch.audit.entry",
            entry_id = %entry.entry_id,
            tool_name = %entry.tool_name,
            principal_id = %entry.principal_id,
            outcome = entry.outcome.as_str(),
            success = entry.success,
            "tool execution audited"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use crate::{
        audit::{AuditOutcome, AuditSink, ExecutionLogEntry, InMemoryAuditSink, TracingAuditSink},
        domain::tool::ExecutionResult,
    };

    #[test]
    fn in_memory_sink_keeps_entries_in_write_order() {
        let sink = InMemoryAuditSink::default();
        let mut params = Map::new();
        params.insert("order_number".to_owned(), json!("SO20240001"));

        sink.write(ExecutionLogEntry::new(
            "approve_sales_order",
            "u-7",
            params.clone(),
            ExecutionResult::pending_approval("awaiting approval"),
            AuditOutcome::PendingApproval,
        ))
        .expect("in-memory sink never fails");
        sink.write(ExecutionLogEntry::new(
            "search_customer",
            "u-7",
            Map::new(),
            ExecutionResult::ok("found", None),
            AuditOutcome::Executed,
        ))
        .expect("in-memory sink never fails");

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, AuditOutcome::PendingApproval);
        assert!(!entries[0].success);
        assert_eq!(entries[0].params, params);
        assert!(entries[1].success);
        assert_ne!(entries[0].entry_id, entries[1].entry_id);
        assert_eq!(sink.entries_for("search_customer").len(), 1);
    }

    #[test]
    fn outcome_serializes_as_snake_case() {
        let encoded = serde_json::to_string(&AuditOutcome::PendingApproval).unwrap_or_default();
        assert_eq!(encoded, "\"pending_approval\"");
        assert!(TracingAuditSink
            .write(ExecutionLogEntry::new(
                "check_inventory",
                "u-1",
                Map::new(),
                ExecutionResult::ok("ok", None),
                AuditOutcome::Executed,
            ))
            .is_ok());
    }
}
