use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateOrder,
    ApproveOrder,
    RejectOrder,
    QueryCustomer,
    QueryProduct,
    QueryInventory,
    CreateQuote,
    QueryOrder,
    Unknown,
}

impl Intent {
    pub const SUPPORTED: [Intent; 8] = [
        Intent::CreateOrder,
        Intent::ApproveOrder,
        Intent::RejectOrder,
        Intent::QueryCustomer,
        Intent::QueryProduct,
        Intent::QueryInventory,
        Intent::CreateQuote,
        Intent::QueryOrder,
    ];

    pub fn as_tag(self) -> &'static str {
        match self {
            Self::CreateOrder => "create_order",
            Self::ApproveOrder => "approve_order",
            Self::RejectOrder => "reject_order",
            Self::QueryCustomer => "query_customer",
            Self::QueryProduct => "query_product",
            Self::QueryInventory => "query_inventory",
            Self::CreateQuote => "create_quote",
            Self::QueryOrder => "query_order",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a wire tag back to an intent. Tags outside the closed set yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_ascii_lowercase();
        Self::SUPPORTED
            .into_iter()
            .chain(std::iter::once(Self::Unknown))
            .find(|intent| intent.as_tag() == normalized)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CreateOrder => "Create sales order",
            Self::ApproveOrder => "Approve sales order",
            Self::RejectOrder => "Reject sales order",
            Self::QueryCustomer => "Query customer",
            Self::QueryProduct => "Query product",
            Self::QueryInventory => "Query inventory",
            Self::CreateQuote => "Create sales quote",
            Self::QueryOrder => "Query order",
            Self::Unknown => "Unknown operation",
        }
    }

    pub fn required_slots(self) -> &'static [&'static str] {
        match self {
            Self::CreateOrder | Self::CreateQuote => &["customer_name", "product_name", "quantity"],
            Self::ApproveOrder | Self::RejectOrder | Self::QueryOrder => &["order_number"],
            Self::QueryCustomer => &["customer_name"],
            Self::QueryProduct | Self::QueryInventory | Self::Unknown => &[],
        }
    }

    pub fn tool_name(self) -> Option<&'static str> {
        match self {
            Self::CreateOrder => Some("create_sales_order"),
            Self::ApproveOrder => Some("approve_sales_order"),
            Self::RejectOrder => Some("reject_sales_order"),
            Self::QueryCustomer => Some("search_customer"),
            Self::QueryProduct => Some("search_product"),
            Self::QueryInventory => Some("check_inventory"),
            Self::CreateQuote => Some("create_sales_quote"),
            Self::QueryOrder => Some("get_order_detail"),
            Self::Unknown => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Llm,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Map<String, Value>,
    pub source_text: String,
    pub source: ClassificationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Slot values count as present only when truthy: `null`, `false`, `0`,
/// blank strings and empty containers are treated as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Required slots not yet satisfied by `collected`, in `required` order.
pub fn missing_slots(required: &[&str], collected: &Map<String, Value>) -> Vec<String> {
    required
        .iter()
        .filter(|slot| !collected.get(**slot).map(is_truthy).unwrap_or(false))
        .map(|slot| (*slot).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{is_truthy, missing_slots, Intent};

    fn slots(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn tags_round_trip_through_the_closed_set() {
        for intent in Intent::SUPPORTED {
            assert_eq!(Intent::from_tag(intent.as_tag()), Some(intent));
        }
        assert_eq!(Intent::from_tag(" Create_Order "), Some(Intent::CreateOrder));
        assert_eq!(Intent::from_tag("unknown"), Some(Intent::Unknown));
        assert_eq!(Intent::from_tag("delete_everything"), None);
    }

    #[test]
    fn every_supported_intent_is_bound_to_a_tool() {
        for intent in Intent::SUPPORTED {
            assert!(intent.tool_name().is_some(), "{intent:?} has no tool");
        }
        assert_eq!(Intent::Unknown.tool_name(), None);
    }

    #[test]
    fn missing_slots_preserves_required_order() {
        let collected = slots(json!({ "quantity": 3 }));
        assert_eq!(
            missing_slots(Intent::CreateOrder.required_slots(), &collected),
            vec!["customer_name".to_string(), "product_name".to_string()]
        );
    }

    #[test]
    fn missing_slots_ignores_falsy_values_and_extra_keys() {
        let collected = slots(json!({
            "customer_name": "  ",
            "product_name": null,
            "quantity": 0,
            "remark": "rush"
        }));
        assert_eq!(
            missing_slots(&["customer_name", "product_name", "quantity"], &collected),
            vec!["customer_name", "product_name", "quantity"]
        );
        assert!(missing_slots(&[], &collected).is_empty());
    }

    #[test]
    fn truthiness_matches_slot_semantics() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!("Acme")));
        assert!(is_truthy(&json!(12)));
        assert!(is_truthy(&json!(true)));
    }
}
