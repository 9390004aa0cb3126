use std::sync::Arc;
use std::time::Duration;

use concierge_core::{ClassificationSource, DispatchError, Intent, IntentClassification};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entities::fallback_classification;
use crate::llm::{LlmClient, LlmRequest};

pub const SYSTEM_PROMPT: &str = r#"You are the intent parser of a sales operations assistant. Read the user's message (Chinese or English) and classify it.

Supported intents:
- create_order: create a sales order
- approve_order: approve a sales order
- reject_order: reject a sales order
- query_customer: look up a customer
- query_product: look up products
- query_inventory: check inventory levels
- create_quote: create a sales quote
- query_order: look up a sales order
- unknown: anything else

Entity fields to extract when present:
- customer_name, customer_code
- product_name, product_code
- quantity (number)
- amount (number, convert 万 to units of 10000)
- order_number (for example SO2025010001)
- warehouse_name, delivery_address, remark

Reply with a single JSON object and nothing else:
{"intent": "<intent>", "confidence": <0.0-1.0>, "entities": {<field>: <value>}, "reasoning": "<short explanation>"}

Example 1
User: 为北京科技有限公司创建订单，50台笔记本电脑
Reply: {"intent": "create_order", "confidence": 0.95, "entities": {"customer_name": "北京科技有限公司", "product_name": "笔记本电脑", "quantity": 50}, "reasoning": "explicit order creation with customer, product and quantity"}

Example 2
User: 查询订单 SO2025010001
Reply: {"intent": "query_order", "confidence": 0.98, "entities": {"order_number": "SO2025010001"}, "reasoning": "order lookup by number"}"#;

/// Two-path classifier. The model's answer is used when it is well formed;
/// any failure yields the keyword fallback instead. The paths never mix.
#[derive(Clone)]
pub struct IntentExtractor {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl IntentExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn parse(&self, text: &str) -> IntentClassification {
        match self.parse_with_model(text).await {
            Ok(classification) => {
                debug!(
                    event_name = "agent.intent.classified",
                    intent = classification.intent.as_tag(),
                    confidence = classification.confidence,
                    source = "llm",
                    "classified message"
                );
                classification
            }
            Err(error) => {
                let classification = fallback_classification(text);
                warn!(
                    event_name = "agent.intent.fallback",
                    error_class = error.error_class(),
                    error = %error,
                    intent = classification.intent.as_tag(),
                    "language model classification unavailable, using keyword fallback"
                );
                classification
            }
        }
    }

    async fn parse_with_model(&self, text: &str) -> Result<IntentClassification, DispatchError> {
        let request = LlmRequest::new(SYSTEM_PROMPT, text);
        let reply = match tokio::time::timeout(self.timeout, self.llm.complete(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => return Err(DispatchError::Upstream(format!("{error:#}"))),
            Err(_) => {
                return Err(DispatchError::Upstream(format!(
                    "no reply within {} ms",
                    self.timeout.as_millis()
                )))
            }
        };
        parse_llm_reply(&reply, text)
    }
}

/// Reads a model reply into a classification. The first balanced JSON
/// object is taken, surrounding prose is ignored.
pub fn parse_llm_reply(reply: &str, source_text: &str) -> Result<IntentClassification, DispatchError> {
    let object = first_balanced_object(reply)
        .ok_or_else(|| DispatchError::Upstream("reply contained no json object".to_string()))?;
    let payload: Value = serde_json::from_str(object)
        .map_err(|error| DispatchError::Upstream(format!("reply json is invalid: {error}")))?;

    let tag = payload
        .get("intent")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Upstream("reply has no intent".to_string()))?;
    let intent = Intent::from_tag(tag)
        .ok_or_else(|| DispatchError::Upstream(format!("reply intent `{tag}` is not supported")))?;

    let confidence = payload.get("confidence").and_then(Value::as_f64).unwrap_or(0.0).clamp(0.0, 1.0);
    let entities = match payload.get("entities") {
        Some(Value::Object(fields)) => fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        _ => Map::new(),
    };
    let reasoning = payload
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string);

    Ok(IntentClassification {
        intent,
        confidence,
        entities,
        source_text: source_text.to_string(),
        source: ClassificationSource::Llm,
        reasoning,
    })
}

/// The first `{...}` substring whose braces balance, skipping braces inside
/// string literals.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use concierge_core::{ClassificationSource, Intent};
    use serde_json::json;

    use super::{first_balanced_object, parse_llm_reply, IntentExtractor, SYSTEM_PROMPT};
    use crate::llm::{LlmClient, LlmRequest};

    struct ScriptedLlm {
        reply: Result<String, String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn replying(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0) }
        }

        fn failing(message: &str) -> Self {
            Self { reply: Err(message.to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &LlmRequest) -> Result<String> {
            assert_eq!(request.system_prompt, SYSTEM_PROMPT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.reply.clone().map_err(|message| anyhow!(message))
        }
    }

    fn extractor(llm: ScriptedLlm) -> IntentExtractor {
        IntentExtractor::new(Arc::new(llm), Duration::from_millis(200))
    }

    #[test]
    fn finds_first_balanced_object_inside_prose() {
        let reply = "Sure! {\"intent\": \"query_order\", \"entities\": {\"order_number\": \"SO1234\"}} hope that helps {}";
        assert_eq!(
            first_balanced_object(reply),
            Some("{\"intent\": \"query_order\", \"entities\": {\"order_number\": \"SO1234\"}}")
        );
    }

    #[test]
    fn braces_inside_strings_do_not_count() {
        let reply = r#"{"intent": "unknown", "reasoning": "user typed } and \" {"}"#;
        assert_eq!(first_balanced_object(reply), Some(reply));
        assert_eq!(first_balanced_object("{\"intent\": \"unknown\""), None);
        assert_eq!(first_balanced_object("no json here"), None);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let classification = parse_llm_reply("{\"intent\": \"query_inventory\", \"entities\": []}", "stock?")
            .expect("reply parses");
        assert_eq!(classification.intent, Intent::QueryInventory);
        assert_eq!(classification.confidence, 0.0);
        assert!(classification.entities.is_empty());
        assert_eq!(classification.source, ClassificationSource::Llm);
    }

    #[test]
    fn unsupported_intent_tag_is_rejected() {
        let error = parse_llm_reply("{\"intent\": \"delete_everything\"}", "x").expect_err("must fail");
        assert_eq!(error.error_class(), "upstream");
    }

    #[tokio::test]
    async fn uses_model_reply_when_well_formed() {
        let llm = ScriptedLlm::replying(
            "```json\n{\"intent\": \"create_order\", \"confidence\": 0.92, \"entities\": {\"customer_name\": \"Acme\", \"quantity\": 5}, \"reasoning\": \"order\"}\n```",
        );
        let classification = extractor(llm).parse("order 5 for Acme").await;

        assert_eq!(classification.intent, Intent::CreateOrder);
        assert_eq!(classification.confidence, 0.92);
        assert_eq!(classification.entities.get("quantity"), Some(&json!(5)));
        assert_eq!(classification.source, ClassificationSource::Llm);
        assert_eq!(classification.reasoning.as_deref(), Some("order"));
    }

    #[tokio::test]
    async fn explicit_unknown_from_model_is_kept() {
        let llm = ScriptedLlm::replying("{\"intent\": \"unknown\", \"confidence\": 0.9}");
        let classification = extractor(llm).parse("create order, 100 units").await;
        assert_eq!(classification.intent, Intent::Unknown);
        assert_eq!(classification.source, ClassificationSource::Llm);
    }

    #[tokio::test]
    async fn client_error_falls_back_to_keywords() {
        let classification =
            extractor(ScriptedLlm::failing("connection refused")).parse("create order, 100 units, laptop").await;

        assert_eq!(classification.intent, Intent::CreateOrder);
        assert_eq!(classification.confidence, 0.7);
        assert_eq!(classification.entities.get("quantity"), Some(&json!(100)));
        assert_eq!(classification.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_without_merging() {
        let llm = ScriptedLlm::replying("{\"intent\": \"create_order\", \"entities\": {\"customer_name\": ");
        let classification = extractor(llm).parse("query all products").await;

        assert_eq!(classification.intent, Intent::QueryProduct);
        assert!(classification.entities.is_empty());
        assert_eq!(classification.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn slow_model_times_out_into_fallback() {
        let mut llm = ScriptedLlm::replying("{\"intent\": \"query_order\"}");
        llm.delay = Duration::from_secs(5);
        let extractor = IntentExtractor::new(Arc::new(llm), Duration::from_millis(20));

        let classification = extractor.parse("查询库存").await;
        assert_eq!(classification.intent, Intent::QueryInventory);
        assert_eq!(classification.source, ClassificationSource::Fallback);
    }
}
