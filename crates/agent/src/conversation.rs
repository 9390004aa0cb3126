use std::sync::Arc;

use concierge_core::{
    is_truthy, missing_slots, ConversationAction, ConversationEvent, ConversationFlow,
    ConversationState, DispatchError, ExecutionResult, Intent, Principal, ToolExecutor,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::entities::{extract_entities, mentions};
use crate::intent::IntentExtractor;
use crate::session::{ConversationSession, Role};

const AFFIRMATIVE_WORDS: &[&str] = &[
    "确认", "是的", "好的", "可以", "没问题", "ok", "okay", "yes", "y", "confirm", "confirmed",
    "sure", "proceed", "go ahead",
];
const NEGATIVE_WORDS: &[&str] = &["取消", "否", "不要", "不用", "算了", "no", "n", "cancel", "stop", "abort"];
const CANCEL_WORDS: &[&str] = &["取消", "重来", "重新开始", "cancel", "reset", "start over", "abort"];

const UNKNOWN_INTENT_REPLY: &str = "Sorry, I did not understand that. Would you like to create an order, \
query a customer, query a product, or something else?";
const CANCELLED_REPLY: &str = "OK, the current operation has been cancelled. What would you like to do?";
const DECLINED_REPLY: &str = "Operation cancelled.";
const COMPLETED_REPLY: &str = "This operation has finished. Please start a new conversation to continue.";
const STILL_EXECUTING_REPLY: &str = "The previous operation is still running. Please wait for it to finish.";

/// What the caller gets back for every message, including failed turns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationReply {
    pub session_id: String,
    pub state: ConversationState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_slots: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplyKind {
    Positive,
    Negative,
    Unclear,
}

/// A reply that matches both word sets is unclear.
fn classify_reply(text: &str, positive: &[&str], negative: &[&str]) -> ReplyKind {
    let is_positive = positive.iter().any(|word| mentions(text, word));
    let is_negative = negative.iter().any(|word| mentions(text, word));
    match (is_positive, is_negative) {
        (true, false) => ReplyKind::Positive,
        (false, true) => ReplyKind::Negative,
        _ => ReplyKind::Unclear,
    }
}

/// Drives one session through the dialogue: intent, slot collection,
/// confirmation, execution.
pub struct ConversationEngine {
    extractor: IntentExtractor,
    executor: Arc<dyn ToolExecutor>,
    flow: ConversationFlow,
}

impl ConversationEngine {
    pub fn new(extractor: IntentExtractor, executor: Arc<dyn ToolExecutor>) -> Self {
        Self { extractor, executor, flow: ConversationFlow::new() }
    }

    /// Handles one user message. Never fails: errors move the session to
    /// `Error` and are reported in the reply.
    pub async fn process_message(
        &self,
        session: &mut ConversationSession,
        principal: &Principal,
        text: &str,
    ) -> ConversationReply {
        session.push_turn(Role::User, text);
        let result_before = session.last_result.clone();

        let message = match self.step(session, principal, text).await {
            Ok(message) => message,
            Err(error) => self.fail(session, error),
        };

        session.push_turn(Role::Assistant, message.clone());
        let result = match &session.last_result {
            Some(result) if Some(result) != result_before.as_ref() => Some(result.clone()),
            _ => None,
        };

        ConversationReply {
            session_id: session.session_id.clone(),
            state: session.state,
            message,
            intent: session.current_intent,
            missing_slots: session.missing_slots.clone(),
            result,
        }
    }

    async fn step(
        &self,
        session: &mut ConversationSession,
        principal: &Principal,
        text: &str,
    ) -> Result<String, DispatchError> {
        match session.state {
            ConversationState::Greeting => self.on_greeting(session, text).await,
            ConversationState::CollectingInfo => self.on_collecting(session, text),
            ConversationState::Confirming => self.on_confirming(session, principal, text).await,
            ConversationState::Executing => Ok(STILL_EXECUTING_REPLY.to_string()),
            ConversationState::Completed => Ok(COMPLETED_REPLY.to_string()),
            ConversationState::Error => Ok(restart_after_error(session.error_message.as_deref())),
        }
    }

    async fn on_greeting(
        &self,
        session: &mut ConversationSession,
        text: &str,
    ) -> Result<String, DispatchError> {
        let classification = self.extractor.parse(text).await;
        if classification.intent == Intent::Unknown {
            let actions = self.advance(session, ConversationEvent::IntentUnrecognized)?;
            return Ok(self.render(session, &actions));
        }

        session.current_intent = Some(classification.intent);
        merge_slots(&mut session.collected_slots, classification.entities);
        let event = self.refresh_missing(session);
        let actions = self.advance(session, event)?;
        Ok(self.render(session, &actions))
    }

    fn on_collecting(&self, session: &mut ConversationSession, text: &str) -> Result<String, DispatchError> {
        merge_slots(&mut session.collected_slots, extract_entities(text));
        let event = match self.refresh_missing(session) {
            ConversationEvent::SlotsComplete => ConversationEvent::SlotsComplete,
            _ => match classify_reply(text, AFFIRMATIVE_WORDS, CANCEL_WORDS) {
                ReplyKind::Positive => ConversationEvent::ProceedRequested,
                ReplyKind::Negative => ConversationEvent::CancelRequested,
                ReplyKind::Unclear => ConversationEvent::SlotsMissing,
            },
        };
        let actions = self.advance(session, event)?;
        Ok(self.render(session, &actions))
    }

    async fn on_confirming(
        &self,
        session: &mut ConversationSession,
        principal: &Principal,
        text: &str,
    ) -> Result<String, DispatchError> {
        if self.refresh_missing(session) == ConversationEvent::SlotsMissing {
            let actions = self.advance(session, ConversationEvent::SlotsMissing)?;
            return Ok(self.render(session, &actions));
        }

        let event = match classify_reply(text, AFFIRMATIVE_WORDS, NEGATIVE_WORDS) {
            ReplyKind::Positive => ConversationEvent::Confirmed,
            ReplyKind::Negative => ConversationEvent::Declined,
            ReplyKind::Unclear => ConversationEvent::ReplyAmbiguous,
        };
        let actions = self.advance(session, event)?;
        if !actions.contains(&ConversationAction::InvokeTool) {
            return Ok(self.render(session, &actions));
        }

        let result = self.invoke(session, principal).await?;
        // Pending approval is a distinct, non-failing outcome.
        let event = if result.success || result.pending_approval {
            ConversationEvent::ExecutionSucceeded
        } else {
            ConversationEvent::ExecutionFailed
        };
        if event == ConversationEvent::ExecutionFailed {
            session.error_message = Some(result.summary());
        }
        session.last_result = Some(result);
        let actions = self.advance(session, event)?;
        Ok(self.render(session, &actions))
    }

    async fn invoke(
        &self,
        session: &ConversationSession,
        principal: &Principal,
    ) -> Result<ExecutionResult, DispatchError> {
        let intent = session.current_intent.unwrap_or(Intent::Unknown);
        let tool_name = intent
            .tool_name()
            .ok_or(DispatchError::State { state: ConversationState::Executing })?;

        info!(
            event_name = "agent.conversation.invoke",
            session_id = %session.session_id,
            principal_id = %principal.id,
            tool_name,
            "invoking tool for confirmed request"
        );
        Ok(self.executor.execute(tool_name, principal, session.collected_slots.clone()).await)
    }

    /// Applies `event` through the transition table and performs the
    /// actions that mutate the session.
    fn advance(
        &self,
        session: &mut ConversationSession,
        event: ConversationEvent,
    ) -> Result<Vec<ConversationAction>, DispatchError> {
        let outcome = self.flow.apply(session.state, event)?;
        info!(
            event_name = "agent.conversation.transition",
            session_id = %session.session_id,
            from = ?outcome.from,
            to = ?outcome.to,
            event = ?outcome.event,
            "conversation transition"
        );
        session.state = outcome.to;
        if outcome.actions.contains(&ConversationAction::ResetSlots) {
            session.clear_slots();
        }
        if outcome.actions.contains(&ConversationAction::AcknowledgeDecline) {
            session.last_result = Some(ExecutionResult::failure(DECLINED_REPLY, "declined by user"));
        }
        Ok(outcome.actions)
    }

    fn render(&self, session: &ConversationSession, actions: &[ConversationAction]) -> String {
        let parts: Vec<String> = actions
            .iter()
            .filter_map(|action| match action {
                ConversationAction::PromptClarification => Some(UNKNOWN_INTENT_REPLY.to_string()),
                ConversationAction::PromptForMissingSlots => {
                    Some(clarifying_question(&session.missing_slots))
                }
                ConversationAction::RenderSummary => Some(confirmation_summary(session)),
                ConversationAction::AcknowledgeCancel => Some(CANCELLED_REPLY.to_string()),
                ConversationAction::AcknowledgeDecline => Some(DECLINED_REPLY.to_string()),
                ConversationAction::ReportOutcome => Some(outcome_message(session)),
                ConversationAction::ReportFault => {
                    Some(restart_after_error(session.error_message.as_deref()))
                }
                ConversationAction::ResetSlots | ConversationAction::InvokeTool => None,
            })
            .collect();
        parts.join("\n\n")
    }

    /// Recomputes `missing_slots` for the current intent and returns the
    /// matching event.
    fn refresh_missing(&self, session: &mut ConversationSession) -> ConversationEvent {
        let required = session.current_intent.map(Intent::required_slots).unwrap_or_default();
        session.missing_slots = missing_slots(required, &session.collected_slots);
        if session.missing_slots.is_empty() {
            ConversationEvent::SlotsComplete
        } else {
            ConversationEvent::SlotsMissing
        }
    }

    fn fail(&self, session: &mut ConversationSession, error: DispatchError) -> String {
        warn!(
            event_name = "agent.conversation.fault",
            session_id = %session.session_id,
            state = ?session.state,
            error_class = error.error_class(),
            error = %error,
            "conversation handler failed"
        );
        session.error_message = Some(error.to_string());
        match self.flow.apply(session.state, ConversationEvent::Fault) {
            Ok(outcome) => session.state = outcome.to,
            Err(reject) => {
                warn!(event_name = "agent.conversation.fault_rejected", error = %reject, "fault not applicable");
            }
        }
        format!("Sorry, something went wrong: {} Please start again.", error.user_message())
    }
}

fn merge_slots(collected: &mut Map<String, Value>, entities: Map<String, Value>) {
    for (name, value) in entities {
        if is_truthy(&value) {
            collected.insert(name, value);
        }
    }
}

pub fn slot_question(slot: &str) -> String {
    match slot {
        "customer_name" => "What is the customer name?".to_string(),
        "customer_code" => "What is the customer code?".to_string(),
        "product_name" => "What is the product name?".to_string(),
        "product_code" => "What is the product code?".to_string(),
        "quantity" => "What quantity is needed?".to_string(),
        "amount" => "What is the amount?".to_string(),
        "order_number" => "What is the order number?".to_string(),
        "warehouse_name" => "Which warehouse should be used?".to_string(),
        "delivery_address" => "What is the delivery address?".to_string(),
        other => format!("Please provide the {}.", other.replace('_', " ")),
    }
}

/// One question for a single missing slot, an enumerated list otherwise.
pub fn clarifying_question(missing: &[String]) -> String {
    match missing {
        [] => String::new(),
        [only] => slot_question(only),
        many => {
            let lines: Vec<String> = many.iter().map(|slot| format!("- {}", slot_question(slot))).collect();
            format!("I need the following information:\n{}", lines.join("\n"))
        }
    }
}

/// Deterministic summary: required slots in declared order, then any extra
/// collected values by name.
pub fn confirmation_summary(session: &ConversationSession) -> String {
    let intent = session.current_intent.unwrap_or(Intent::Unknown);
    let required = intent.required_slots();
    let mut lines = vec![format!("Operation: {}", intent.label())];

    let ordered = required
        .iter()
        .filter_map(|slot| session.collected_slots.get_key_value(*slot))
        .chain(session.collected_slots.iter().filter(|(name, _)| !required.contains(&name.as_str())));
    for (name, value) in ordered {
        lines.push(format!("{name}: {}", display_value(value)));
    }

    format!(
        "Please confirm the following operation:\n\n{}\n\nReply \"confirm\" to continue or \"cancel\" to stop.",
        lines.join("\n")
    )
}

fn outcome_message(session: &ConversationSession) -> String {
    match &session.last_result {
        Some(result) if result.pending_approval => {
            format!("{} The request is waiting for approval.", result.message.trim())
        }
        Some(result) if result.success => result.summary(),
        Some(result) => format!("Operation failed: {}", result.summary()),
        None => COMPLETED_REPLY.to_string(),
    }
}

fn restart_after_error(error: Option<&str>) -> String {
    match error {
        Some(error) => format!("Operation failed: {error}. Please start a new conversation to continue."),
        None => "Operation failed. Please start a new conversation to continue.".to_string(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
