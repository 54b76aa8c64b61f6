//! Agent orchestration
//!
//! The pieces of a conversational turn: the response parser, the completion
//! heuristic, the execution policy, the per-turn context and the loop that
//! drives them.

pub mod completion;
pub mod context;
pub mod core;
pub mod parser;
pub mod policy;

pub use completion::{CompletionHeuristic, CompletionVerdict};
pub use context::{ConversationContext, RoundRecord};
pub use self::core::{Conversation, Orchestrator, StopReason, TurnError, TurnOutcome};
pub use parser::{ParseOutcome, ResponseParser};
pub use policy::{ExecutionHistory, ExecutionPolicyEngine, PolicyClass, PolicyDecision, RateBucket};
