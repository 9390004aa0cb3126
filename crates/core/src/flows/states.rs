use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Greeting,
    CollectingInfo,
    Confirming,
    Executing,
    Completed,
    Error,
}

impl ConversationState {
    pub const ALL: [ConversationState; 6] = [
        ConversationState::Greeting,
        ConversationState::CollectingInfo,
        ConversationState::Confirming,
        ConversationState::Executing,
        ConversationState::Completed,
        ConversationState::Error,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationEvent {
    IntentUnrecognized,
    SlotsMissing,
    SlotsComplete,
    ProceedRequested,
    CancelRequested,
    Confirmed,
    Declined,
    ReplyAmbiguous,
    ExecutionSucceeded,
    ExecutionFailed,
    Fault,
}

impl ConversationEvent {
    pub const ALL: [ConversationEvent; 11] = [
        ConversationEvent::IntentUnrecognized,
        ConversationEvent::SlotsMissing,
        ConversationEvent::SlotsComplete,
        ConversationEvent::ProceedRequested,
        ConversationEvent::CancelRequested,
        ConversationEvent::Confirmed,
        ConversationEvent::Declined,
        ConversationEvent::ReplyAmbiguous,
        ConversationEvent::ExecutionSucceeded,
        ConversationEvent::ExecutionFailed,
        ConversationEvent::Fault,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationAction {
    PromptClarification,
    PromptForMissingSlots,
    RenderSummary,
    ResetSlots,
    AcknowledgeCancel,
    AcknowledgeDecline,
    InvokeTool,
    ReportOutcome,
    ReportFault,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: ConversationEvent,
    pub actions: Vec<ConversationAction>,
}
