use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::DispatchError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

/// Declarative parameter set of a tool. Field order is significant: it drives
/// both validation order and the order of the exported `required` list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    fields: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ParamType, description: &str) -> Self {
        self.field(name, kind, true, description)
    }

    pub fn optional(self, name: &str, kind: ParamType, description: &str) -> Self {
        self.field(name, kind, false, description)
    }

    fn field(mut self, name: &str, kind: ParamType, required: bool, description: &str) -> Self {
        self.fields.retain(|field| field.name != name);
        self.fields.push(ParameterSpec {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        });
        self
    }

    pub fn fields(&self) -> &[ParameterSpec] {
        &self.fields
    }

    pub fn required_names(&self) -> Vec<&str> {
        self.fields.iter().filter(|field| field.required).map(|field| field.name.as_str()).collect()
    }

    /// Fail-fast validation: the first missing required field or mistyped
    /// present field is reported, nothing is aggregated.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), DispatchError> {
        for field in self.fields.iter().filter(|field| field.required) {
            match args.get(&field.name) {
                None | Some(Value::Null) => {
                    return Err(DispatchError::Validation {
                        field: field.name.clone(),
                        message: format!("missing required parameter `{}`", field.name),
                    });
                }
                Some(_) => {}
            }
        }

        for field in &self.fields {
            let Some(value) = args.get(&field.name) else {
                continue;
            };
            if value.is_null() && !field.required {
                continue;
            }
            if !field.kind.accepts(value) {
                return Err(DispatchError::Validation {
                    field: field.name.clone(),
                    message: format!(
                        "parameter `{}` must be of type {}",
                        field.name,
                        field.kind.json_type()
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({ "type": field.kind.json_type(), "description": field.description }),
            );
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_names(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContract {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
    pub risk_level: RiskLevel,
    pub required_permission: Option<String>,
    pub requires_approval: bool,
    pub cacheable: bool,
}

impl ToolContract {
    /// Low-risk contracts start out cacheable; raising the risk level clears it.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ParameterSchema::new(),
            risk_level: RiskLevel::Low,
            required_permission: None,
            requires_approval: false,
            cacheable: true,
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        if risk_level != RiskLevel::Low {
            self.cacheable = false;
        }
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn is_cache_eligible(&self) -> bool {
        self.risk_level == RiskLevel::Low && self.cacheable
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_approval: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self { success: true, data, message: message.into(), ..Self::default() }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), error: Some(error.into()), ..Self::default() }
    }

    pub fn pending_approval(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), pending_approval: true, ..Self::default() }
    }

    /// Human-readable line for chat replies: the message, or the error when
    /// the handler left the message empty.
    pub fn summary(&self) -> String {
        match (&self.error, self.message.trim().is_empty()) {
            (Some(error), true) => error.clone(),
            (Some(error), false) if !self.success => format!("{}: {error}", self.message),
            _ => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{ExecutionResult, ParamType, ParameterSchema, RiskLevel, ToolContract};
    use crate::errors::DispatchError;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn order_schema() -> ParameterSchema {
        ParameterSchema::new()
            .required("customer_name", ParamType::String, "Customer")
            .required("quantity", ParamType::Integer, "Units")
            .optional("unit_price", ParamType::Number, "Price per unit")
            .optional("urgent", ParamType::Boolean, "Rush delivery")
    }

    fn failing_field(result: Result<(), DispatchError>) -> Option<String> {
        match result {
            Err(DispatchError::Validation { field, .. }) => Some(field),
            _ => None,
        }
    }

    #[test]
    fn accepts_well_typed_arguments() {
        let schema = order_schema();
        let result = schema.validate(&args(json!({
            "customer_name": "Acme",
            "quantity": 3,
            "unit_price": 12,
            "urgent": false
        })));
        assert!(result.is_ok());
    }

    #[test]
    fn missing_required_field_fails_first_in_declared_order() {
        let schema = order_schema();
        let field = failing_field(schema.validate(&args(json!({ "urgent": "yes" }))));
        assert_eq!(field.as_deref(), Some("customer_name"));
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        let schema = order_schema();
        let field = failing_field(
            schema.validate(&args(json!({ "customer_name": "Acme", "quantity": null }))),
        );
        assert_eq!(field.as_deref(), Some("quantity"));
    }

    #[test]
    fn type_mismatch_names_the_offending_field() {
        let schema = order_schema();
        let field = failing_field(schema.validate(&args(json!({
            "customer_name": "Acme",
            "quantity": 2.5
        }))));
        assert_eq!(field.as_deref(), Some("quantity"));

        let field = failing_field(schema.validate(&args(json!({
            "customer_name": "Acme",
            "quantity": 2,
            "urgent": 1
        }))));
        assert_eq!(field.as_deref(), Some("urgent"));
    }

    #[test]
    fn json_schema_lists_required_fields_in_order() {
        let schema = order_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["customer_name", "quantity"]));
        assert_eq!(schema["properties"]["unit_price"]["type"], "number");
    }

    #[test]
    fn raising_risk_clears_cacheability() {
        let contract = ToolContract::new("approve", "Approve").with_risk(RiskLevel::High);
        assert!(!contract.is_cache_eligible());

        let contract = ToolContract::new("search", "Search");
        assert!(contract.is_cache_eligible());
        assert!(!contract.with_cacheable(false).is_cache_eligible());
    }

    #[test]
    fn result_markers_are_omitted_from_json_when_unset() {
        let encoded = serde_json::to_value(ExecutionResult::ok("done", None)).unwrap_or_default();
        assert!(encoded.get("cached").is_none());
        assert!(encoded.get("pending_approval").is_none());

        let pending = serde_json::to_value(ExecutionResult::pending_approval("needs review"))
            .unwrap_or_default();
        assert_eq!(pending["pending_approval"], true);
    }
}
