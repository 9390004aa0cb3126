//! Stand-in tools for the operator CLI. Each handler answers with fixed demo
//! data so the dialogue can be exercised end to end without a backend.

use std::sync::Arc;

use concierge_core::{
    handler_fn, ExecutionResult, ParamType, ParameterSchema, PermissionPredicate, RegistryError,
    RiskLevel, ToolContract, ToolRegistry,
};
use serde_json::{json, Map, Value};

pub const CUSTOMER_READ: &str = "customer.read";
pub const ORDER_READ: &str = "sales.order.read";
pub const ORDER_CREATE: &str = "sales.order.create";
pub const ORDER_APPROVE: &str = "sales.order.approve";
pub const QUOTE_CREATE: &str = "sales.quote.create";

fn text(args: &Map<String, Value>, key: &str) -> String {
    match args.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn line_item_schema() -> ParameterSchema {
    ParameterSchema::new()
        .required("customer_name", ParamType::String, "Customer name")
        .required("product_name", ParamType::String, "Product name")
        .required("quantity", ParamType::Integer, "Number of units")
        .optional("amount", ParamType::Number, "Total amount")
        .optional("delivery_address", ParamType::String, "Delivery address")
        .optional("remark", ParamType::String, "Free-form remark")
}

fn order_number_schema() -> ParameterSchema {
    ParameterSchema::new().required("order_number", ParamType::String, "Sales order number, e.g. SO2025010001")
}

pub fn demo_registry(permissions: Arc<dyn PermissionPredicate>) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new(permissions);

    registry.register(
        ToolContract::new("search_customer", "Search customers by name")
            .with_parameters(ParameterSchema::new().required("customer_name", ParamType::String, "Customer name"))
            .with_permission(CUSTOMER_READ),
        handler_fn(|args| async move {
            let name = text(&args, "customer_name");
            Ok(ExecutionResult::ok(
                format!("Found 1 customer matching {name}."),
                Some(json!([{"customer_code": "C0001", "customer_name": name, "credit_limit": 500000}])),
            ))
        }),
    )?;

    registry.register(
        ToolContract::new("search_product", "Search the product catalogue")
            .with_parameters(
                ParameterSchema::new()
                    .optional("product_name", ParamType::String, "Product name or keyword")
                    .optional("product_code", ParamType::String, "Product code"),
            ),
        handler_fn(|_args| async move {
            Ok(ExecutionResult::ok(
                "Found 2 products.",
                Some(json!([
                    {"product_code": "P1001", "product_name": "Laptop", "unit_price": 5999},
                    {"product_code": "P1002", "product_name": "Monitor", "unit_price": 1299},
                ])),
            ))
        }),
    )?;

    // Stock levels change constantly, so results are never cached.
    registry.register(
        ToolContract::new("check_inventory", "Check current stock levels")
            .with_parameters(
                ParameterSchema::new()
                    .optional("product_name", ParamType::String, "Product name")
                    .optional("warehouse_name", ParamType::String, "Warehouse"),
            )
            .with_cacheable(false),
        handler_fn(|_args| async move {
            Ok(ExecutionResult::ok(
                "Inventory: Laptop 120 units, Monitor 45 units.",
                Some(json!({"Laptop": 120, "Monitor": 45})),
            ))
        }),
    )?;

    registry.register(
        ToolContract::new("get_order_detail", "Show one sales order")
            .with_parameters(order_number_schema())
            .with_permission(ORDER_READ),
        handler_fn(|args| async move {
            let order_number = text(&args, "order_number");
            Ok(ExecutionResult::ok(
                format!("Order {order_number} is awaiting approval."),
                Some(json!({"order_number": order_number, "status": "pending_approval", "total": 59990})),
            ))
        }),
    )?;

    registry.register(
        ToolContract::new("create_sales_order", "Create a sales order")
            .with_parameters(line_item_schema())
            .with_risk(RiskLevel::Medium)
            .with_permission(ORDER_CREATE),
        handler_fn(|args| async move {
            Ok(ExecutionResult::ok(
                format!(
                    "Created order SO2025010001 for {} ({} x {}).",
                    text(&args, "customer_name"),
                    text(&args, "quantity"),
                    text(&args, "product_name"),
                ),
                Some(json!({"order_number": "SO2025010001", "status": "draft"})),
            ))
        }),
    )?;

    registry.register(
        ToolContract::new("create_sales_quote", "Create a sales quote")
            .with_parameters(line_item_schema())
            .with_risk(RiskLevel::Medium)
            .with_permission(QUOTE_CREATE),
        handler_fn(|args| async move {
            Ok(ExecutionResult::ok(
                format!("Created quote SQ2025010001 for {}.", text(&args, "customer_name")),
                Some(json!({"quote_number": "SQ2025010001", "status": "draft"})),
            ))
        }),
    )?;

    registry.register(
        ToolContract::new("approve_sales_order", "Approve a sales order")
            .with_parameters(order_number_schema())
            .with_risk(RiskLevel::High)
            .with_permission(ORDER_APPROVE)
            .with_approval(),
        handler_fn(|args| async move {
            Ok(ExecutionResult::ok(format!("Order {} approved.", text(&args, "order_number")), None))
        }),
    )?;

    registry.register(
        ToolContract::new("reject_sales_order", "Reject a sales order")
            .with_parameters(order_number_schema().optional("remark", ParamType::String, "Reason"))
            .with_risk(RiskLevel::High)
            .with_permission(ORDER_APPROVE)
            .with_approval(),
        handler_fn(|args| async move {
            Ok(ExecutionResult::ok(format!("Order {} rejected.", text(&args, "order_number")), None))
        }),
    )?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concierge_core::{DenyAll, Intent, Principal};

    use super::demo_registry;

    #[test]
    fn every_intent_has_a_registered_tool() {
        let registry = demo_registry(Arc::new(DenyAll)).expect("catalog registers");
        for intent in Intent::SUPPORTED {
            let tool = intent.tool_name().expect("supported intents bind a tool");
            assert!(registry.contract(tool).is_some(), "missing tool {tool}");
        }
        assert_eq!(registry.len(), Intent::SUPPORTED.len());
    }

    #[test]
    fn unprivileged_users_only_see_open_tools() {
        let registry = demo_registry(Arc::new(DenyAll)).expect("catalog registers");
        let visible: Vec<&str> =
            registry.list_available(&Principal::user("guest")).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(visible, vec!["search_product", "check_inventory"]);
    }
}
