//! Conversation layer of the dispatch engine.
//!
//! Turns free text into tool invocations over several turns:
//! 1. **Intent extraction** (`intent`, `entities`) - the language model first,
//!    a deterministic keyword and regex parser whenever the model fails
//! 2. **Slot collection** (`conversation`) - asks for missing parameters
//! 3. **Confirmation** - nothing runs until the user confirms the summary
//! 4. **Execution** - through the cached, permission-gated pipeline from
//!    `concierge-core`
//!
//! # Key Types
//!
//! - `AgentRuntime` - wires config, registry, cache, monitor and sessions
//! - `LlmClient` - pluggable model boundary (OpenAI, Anthropic, Ollama)
//! - `SessionStore` - per-session locking and idle expiry
//!
//! # Safety Principle
//!
//! The model only classifies text. Permission, validation and approval
//! decisions are made by the pipeline, never by the model.

pub mod conversation;
pub mod entities;
pub mod intent;
pub mod llm;
pub mod runtime;
pub mod session;

pub use conversation::{ConversationEngine, ConversationReply};
pub use intent::IntentExtractor;
pub use llm::{HttpLlmClient, LlmClient, LlmRequest, UnavailableLlmClient};
pub use runtime::AgentRuntime;
pub use session::{ConversationSession, InMemorySessionStore, Role, SessionStore, Turn};
