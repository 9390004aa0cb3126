pub mod engine;
pub mod states;

pub use engine::{ConversationFlow, FlowTransitionError};
pub use states::{ConversationAction, ConversationEvent, ConversationState, TransitionOutcome};
