use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::access::{PermissionPredicate, Principal};
use crate::domain::tool::{ExecutionResult, ToolContract};
use crate::errors::{DispatchError, RegistryError};

/// The business operation behind a tool. Handlers receive arguments that
/// already passed schema validation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<ExecutionResult>;
}

pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
{
    async fn call(&self, args: Map<String, Value>) -> Result<ExecutionResult> {
        (self.f)(args).await
    }
}

/// Wraps an async closure as a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
{
    FnHandler { f }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportProtocol {
    /// `{"type":"function","function":{name, description, parameters}}`
    FunctionCalling,
    /// `{name, description, input_schema}`
    ToolUse,
}

impl FromStr for ExportProtocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "function-calling" | "function_calling" | "openai" => Ok(Self::FunctionCalling),
            "tool-use" | "tool_use" | "anthropic" => Ok(Self::ToolUse),
            other => Err(format!("unsupported export protocol `{other}`")),
        }
    }
}

/// A resolved tool, bound to the principal it was resolved for.
#[derive(Clone)]
pub struct ToolHandle {
    pub contract: Arc<ToolContract>,
    pub handler: Arc<dyn ToolHandler>,
    pub permitted: bool,
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolHandle")
            .field("contract", &self.contract.name)
            .field("permitted", &self.permitted)
            .finish()
    }
}

struct RegisteredTool {
    contract: Arc<ToolContract>,
    handler: Arc<dyn ToolHandler>,
}

/// Name-keyed tool table. Built once at startup, then shared read-only
/// behind an `Arc`.
pub struct ToolRegistry {
    permissions: Arc<dyn PermissionPredicate>,
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new(permissions: Arc<dyn PermissionPredicate>) -> Self {
        Self { permissions, tools: Vec::new(), index: HashMap::new() }
    }

    pub fn register<H>(&mut self, contract: ToolContract, handler: H) -> Result<(), RegistryError>
    where
        H: ToolHandler + 'static,
    {
        self.register_arc(contract, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        contract: ToolContract,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if contract.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(&contract.name) {
            return Err(RegistryError::DuplicateTool(contract.name));
        }

        self.index.insert(contract.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { contract: Arc::new(contract), handler });
        Ok(())
    }

    pub fn resolve(&self, name: &str, principal: &Principal) -> Result<ToolHandle, DispatchError> {
        let tool = self
            .index
            .get(name)
            .and_then(|position| self.tools.get(*position))
            .ok_or_else(|| DispatchError::tool_not_found(name))?;

        Ok(ToolHandle {
            contract: Arc::clone(&tool.contract),
            handler: Arc::clone(&tool.handler),
            permitted: self.permits(principal, &tool.contract),
        })
    }

    pub fn contract(&self, name: &str) -> Option<&ToolContract> {
        self.index.get(name).and_then(|position| self.tools.get(*position)).map(|t| &*t.contract)
    }

    /// Privileged principals and contracts without a required permission
    /// always pass; everything else asks the injected predicate.
    pub fn permits(&self, principal: &Principal, contract: &ToolContract) -> bool {
        if principal.privileged {
            return true;
        }
        match contract.required_permission.as_deref() {
            None => true,
            Some(permission) => self.permissions.has_permission(principal, permission),
        }
    }

    pub fn list_available(&self, principal: &Principal) -> Vec<&ToolContract> {
        self.tools
            .iter()
            .map(|tool| &*tool.contract)
            .filter(|contract| self.permits(principal, contract))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.contract.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn export(&self, protocol: ExportProtocol) -> Vec<Value> {
        self.tools.iter().map(|tool| export_contract(&tool.contract, protocol)).collect()
    }

    pub fn export_for(&self, principal: &Principal, protocol: ExportProtocol) -> Vec<Value> {
        self.list_available(principal)
            .into_iter()
            .map(|contract| export_contract(contract, protocol))
            .collect()
    }
}

fn export_contract(contract: &ToolContract, protocol: ExportProtocol) -> Value {
    let schema = contract.parameters.to_json_schema();
    match protocol {
        ExportProtocol::FunctionCalling => json!({
            "type": "function",
            "function": {
                "name": contract.name,
                "description": contract.description,
                "parameters": schema,
            }
        }),
        ExportProtocol::ToolUse => json!({
            "name": contract.name,
            "description": contract.description,
            "input_schema": schema,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Map;

    use crate::access::{Principal, StaticPermissions};
    use crate::domain::tool::{ExecutionResult, ParamType, ParameterSchema, RiskLevel, ToolContract};
    use crate::errors::{DispatchError, RegistryError};
    use crate::registry::{handler_fn, ExportProtocol, ToolRegistry};

    fn registry() -> ToolRegistry {
        let permissions = StaticPermissions::new().grant("sales", "sales_order:create");
        let mut registry = ToolRegistry::new(Arc::new(permissions));
        registry
            .register(
                ToolContract::new("search_product", "Search the product catalog").with_parameters(
                    ParameterSchema::new().optional("keyword", ParamType::String, "Search text"),
                ),
                handler_fn(|_args| async { Ok(ExecutionResult::ok("no products", None)) }),
            )
            .expect("first registration succeeds");
        registry
            .register(
                ToolContract::new("create_sales_order", "Create a sales order")
                    .with_parameters(
                        ParameterSchema::new()
                            .required("customer_name", ParamType::String, "Customer")
                            .required("quantity", ParamType::Integer, "Units"),
                    )
                    .with_risk(RiskLevel::Medium)
                    .with_permission("sales_order:create"),
                handler_fn(|_args| async { Ok(ExecutionResult::ok("created", None)) }),
            )
            .expect("second registration succeeds");
        registry
    }

    #[test]
    fn duplicate_names_are_rejected_at_registration() {
        let mut registry = registry();
        let error = registry
            .register(
                ToolContract::new("search_product", "again"),
                handler_fn(|_args| async { Ok(ExecutionResult::default()) }),
            )
            .expect_err("duplicate must fail");
        assert_eq!(error, RegistryError::DuplicateTool("search_product".to_owned()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn resolve_unknown_tool_is_not_found() {
        let error = registry()
            .resolve("delete_everything", &Principal::privileged("root"))
            .expect_err("unknown tool");
        assert!(matches!(error, DispatchError::NotFound { .. }));
    }

    #[test]
    fn resolve_reports_permission_for_the_principal() {
        let registry = registry();
        let sales = registry
            .resolve("create_sales_order", &Principal::user("sales"))
            .expect("tool exists");
        let guest = registry
            .resolve("create_sales_order", &Principal::user("guest"))
            .expect("tool exists");
        assert!(sales.permitted);
        assert!(!guest.permitted);
    }

    #[test]
    fn list_available_filters_by_permission_unless_privileged() {
        let registry = registry();
        let guest: Vec<_> =
            registry.list_available(&Principal::user("guest")).iter().map(|c| c.name.clone()).collect();
        assert_eq!(guest, vec!["search_product".to_owned()]);
        assert_eq!(registry.list_available(&Principal::user("sales")).len(), 2);
        assert_eq!(registry.list_available(&Principal::privileged("admin")).len(), 2);
    }

    #[test]
    fn both_export_shapes_carry_the_same_schema() {
        let registry = registry();
        let functions = registry.export(ExportProtocol::FunctionCalling);
        let tools = registry.export(ExportProtocol::ToolUse);

        assert_eq!(functions.len(), tools.len());
        for (function, tool) in functions.iter().zip(tools.iter()) {
            assert_eq!(function["type"], "function");
            assert_eq!(function["function"]["name"], tool["name"]);
            assert_eq!(function["function"]["parameters"], tool["input_schema"]);
        }
        assert_eq!(tools[1]["input_schema"]["required"][1], "quantity");
    }

    #[test]
    fn export_for_hides_forbidden_tools() {
        let exported = registry().export_for(&Principal::user("guest"), ExportProtocol::ToolUse);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0]["name"], "search_product");
    }

    #[test]
    fn protocol_names_parse() {
        assert_eq!("function-calling".parse::<ExportProtocol>(), Ok(ExportProtocol::FunctionCalling));
        assert_eq!("TOOL_USE".parse::<ExportProtocol>(), Ok(ExportProtocol::ToolUse));
        assert!("grpc".parse::<ExportProtocol>().is_err());
    }

    #[tokio::test]
    async fn closure_handlers_receive_arguments() {
        let registry = registry();
        let handle =
            registry.resolve("search_product", &Principal::user("guest")).expect("tool exists");
        let result = handle.handler.call(Map::new()).await.expect("handler succeeds");
        assert_eq!(result.message, "no products");
    }
}
