use thiserror::Error;

use crate::flows::states::{
    ConversationAction, ConversationEvent, ConversationState, TransitionOutcome,
};

/// The dialogue transition table. Session state may only change through
/// [`ConversationFlow::apply`]; anything not listed here is rejected.
#[derive(Clone, Debug, Default)]
pub struct ConversationFlow;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ConversationState, event: ConversationEvent },
}

impl ConversationFlow {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> ConversationState {
        ConversationState::Greeting
    }

    pub fn apply(
        &self,
        current: ConversationState,
        event: ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use ConversationAction::{
            AcknowledgeCancel, AcknowledgeDecline, InvokeTool, PromptClarification,
            PromptForMissingSlots, RenderSummary, ReportFault, ReportOutcome, ResetSlots,
        };
        use ConversationEvent::{
            CancelRequested, Confirmed, Declined, ExecutionFailed, ExecutionSucceeded, Fault,
            IntentUnrecognized, ProceedRequested, ReplyAmbiguous, SlotsComplete, SlotsMissing,
        };
        use ConversationState::{
            CollectingInfo, Completed, Confirming, Error, Executing, Greeting,
        };

        let (to, actions) = match (current, event) {
            (Greeting, IntentUnrecognized) => (Greeting, vec![PromptClarification]),
            (Greeting, SlotsMissing) | (CollectingInfo, SlotsMissing) => {
                (CollectingInfo, vec![PromptForMissingSlots])
            }
            (Greeting, SlotsComplete) | (CollectingInfo, SlotsComplete) => {
                (Confirming, vec![RenderSummary])
            }
            (CollectingInfo, ProceedRequested) => (Confirming, vec![RenderSummary]),
            (CollectingInfo, CancelRequested) => (Greeting, vec![ResetSlots, AcknowledgeCancel]),
            (Confirming, SlotsMissing) => (CollectingInfo, vec![PromptForMissingSlots]),
            (Confirming, Confirmed) => (Executing, vec![InvokeTool]),
            (Confirming, Declined) => (Completed, vec![AcknowledgeDecline]),
            (Confirming, ReplyAmbiguous) => (Confirming, vec![RenderSummary]),
            (Executing, ExecutionSucceeded) => (Completed, vec![ReportOutcome]),
            (Executing, ExecutionFailed) => (Error, vec![ReportOutcome]),
            (state, Fault) if !state.is_terminal() => (Error, vec![ReportFault]),
            _ => {
                return Err(FlowTransitionError::InvalidTransition { state: current, event });
            }
        };

        Ok(TransitionOutcome { from: current, to, event, actions })
    }
}
