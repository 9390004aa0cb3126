//! Core of the dispatch engine: tool contracts and the registry that holds
//! them, the gated execution pipeline, result caching, usage monitoring,
//! audit, the dialogue transition table and configuration.

pub mod access;
pub mod audit;
pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod monitor;
pub mod pipeline;
pub mod registry;

pub use access::{DenyAll, PermissionPredicate, Principal, StaticPermissions};
pub use audit::{
    AuditError, AuditOutcome, AuditSink, ExecutionLogEntry, InMemoryAuditSink, TracingAuditSink,
};
pub use cache::{
    CacheBackend, CacheError, CachedPipeline, InMemoryCacheBackend, NullCacheBackend, ResultCache,
};
pub use domain::{
    is_truthy, missing_slots, ClassificationSource, ExecutionResult, Intent,
    IntentClassification, ParamType, ParameterSchema, ParameterSpec, RiskLevel, ToolContract,
};
pub use errors::{DispatchError, NotFoundKind, RegistryError};
pub use flows::{
    ConversationAction, ConversationEvent, ConversationFlow, ConversationState,
    FlowTransitionError, TransitionOutcome,
};
pub use monitor::{
    AlertSeverity, AlertThresholds, ExecutionTimer, PerformanceAlert, PerformanceReport,
    ToolStats, UsageMonitor,
};
pub use pipeline::{ExecutionPipeline, ToolExecutor};
pub use registry::{handler_fn, ExportProtocol, ToolHandle, ToolHandler, ToolRegistry};
