pub mod intent;
pub mod tool;

pub use intent::{
    is_truthy, missing_slots, ClassificationSource, Intent, IntentClassification,
};
pub use tool::{
    ExecutionResult, ParamType, ParameterSchema, ParameterSpec, RiskLevel, ToolContract,
};
