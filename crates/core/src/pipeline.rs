use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::access::Principal;
use crate::audit::{AuditOutcome, AuditSink, ExecutionLogEntry};
use crate::domain::tool::ExecutionResult;
use crate::errors::DispatchError;
use crate::monitor::UsageMonitor;
use crate::registry::{ToolHandle, ToolRegistry};

/// Runs a named tool on behalf of a principal. Implementations never fail:
/// every error is rendered into the returned [`ExecutionResult`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        principal: &Principal,
        args: Map<String, Value>,
    ) -> ExecutionResult;
}

/// Ordered gates: lookup, permission, validation, approval, invocation,
/// audit. Unknown tools are not audited; every other outcome is.
pub struct ExecutionPipeline {
    registry: Arc<ToolRegistry>,
    audit: Arc<dyn AuditSink>,
    monitor: Arc<UsageMonitor>,
}

impl ExecutionPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        audit: Arc<dyn AuditSink>,
        monitor: Arc<UsageMonitor>,
    ) -> Self {
        Self { registry, audit, monitor }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<UsageMonitor> {
        &self.monitor
    }

    pub async fn run(
        &self,
        tool_name: &str,
        principal: &Principal,
        args: Map<String, Value>,
    ) -> ExecutionResult {
        let handle = match self.registry.resolve(tool_name, principal) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(
                    event_name = "dispatch.pipeline.unknown_tool",
                    tool_name,
                    principal_id = %principal.id,
                    "tool lookup failed"
                );
                return error.into_result();
            }
        };

        if let Err(error) = self.check_gates(&handle, principal, &args) {
            let outcome = match error {
                DispatchError::Permission { .. } => AuditOutcome::Denied,
                DispatchError::ApprovalRequired { .. } => AuditOutcome::PendingApproval,
                _ => AuditOutcome::Rejected,
            };
            info!(
                event_name = "dispatch.pipeline.gated",
                tool_name,
                principal_id = %principal.id,
                outcome = outcome.as_str(),
                error_class = error.error_class(),
                "tool execution stopped at a gate"
            );
            let result = error.into_result();
            self.write_audit(tool_name, principal, args, result.clone(), outcome);
            return result;
        }

        let result = self.invoke(&handle, principal, args.clone()).await;
        let outcome = if result.success { AuditOutcome::Executed } else { AuditOutcome::Failed };
        info!(
            event_name = "dispatch.pipeline.executed",
            tool_name,
            principal_id = %principal.id,
            success = result.success,
            "tool execution finished"
        );
        self.write_audit(tool_name, principal, args, result.clone(), outcome);
        result
    }

    fn check_gates(
        &self,
        handle: &ToolHandle,
        principal: &Principal,
        args: &Map<String, Value>,
    ) -> Result<(), DispatchError> {
        let contract = &handle.contract;
        if !handle.permitted {
            return Err(DispatchError::Permission {
                tool: contract.name.clone(),
                permission: contract.required_permission.clone().unwrap_or_default(),
            });
        }

        contract.parameters.validate(args)?;

        if contract.requires_approval && !principal.privileged {
            return Err(DispatchError::ApprovalRequired { tool: contract.name.clone() });
        }
        Ok(())
    }

    /// The handler runs on its own task so a panic surfaces as a
    /// `JoinError` instead of unwinding through the caller.
    async fn invoke(
        &self,
        handle: &ToolHandle,
        principal: &Principal,
        args: Map<String, Value>,
    ) -> ExecutionResult {
        let timer = self.monitor.start(&handle.contract.name, &principal.id);
        let handler = Arc::clone(&handle.handler);
        let task = tokio::spawn(async move { handler.call(args).await });

        match task.await {
            Ok(Ok(result)) => {
                timer.succeed();
                result
            }
            Ok(Err(error)) => {
                timer.fail();
                DispatchError::Handler(format!("{error:#}")).into_result()
            }
            Err(error) => {
                timer.fail();
                DispatchError::Handler(join_failure(error)).into_result()
            }
        }
    }

    fn write_audit(
        &self,
        tool_name: &str,
        principal: &Principal,
        params: Map<String, Value>,
        result: ExecutionResult,
        outcome: AuditOutcome,
    ) {
        let entry = ExecutionLogEntry::new(tool_name, principal.id.clone(), params, result, outcome);
        if let Err(error) = self.audit.write(entry) {
            warn!(
                event_name = "dispatch.audit.write_failed",
                tool_name,
                principal_id = %principal.id,
                error = %error,
                "audit write failed; result returned unchanged"
            );
        }
    }
}

#[async_trait]
impl ToolExecutor for ExecutionPipeline {
    async fn execute(
        &self,
        tool_name: &str,
        principal: &Principal,
        args: Map<String, Value>,
    ) -> ExecutionResult {
        self.run(tool_name, principal, args).await
    }
}

fn join_failure(error: JoinError) -> String {
    if error.is_cancelled() {
        return "handler task was cancelled".to_owned();
    }
    match error.try_into_panic() {
        Ok(payload) => format!("handler panicked: {}", panic_text(payload.as_ref())),
        Err(error) => error.to_string(),
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "unknown panic payload"
    }
}
