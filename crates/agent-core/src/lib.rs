//! # agent-core
//!
//! Tool-resolution loop for a chat agent backed by externally hosted tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ChatSession                            │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Resolution  │──│ ToolCatalog +    │  │ CompletionClient│  │
//! │  │    Loop      │──│ ToolInvoker      │  │   (Strategy)    │  │
//! │  └──────────────┘  └──────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop only sees the three capability traits; concrete adapters for a
//! model provider and a tool server live in `agent-runtime`.

pub mod error;
pub mod message;
pub mod mock;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;

pub use error::{AgentError, ErrorKind, Result};
pub use message::{ContentBlock, Conversation, Message, Role};
pub use provider::{CompletionClient, GenerationOptions, Turn};
pub use reasoning::{
    AnswerPolicy, FinalAnswer, LoopConfig, ProgressSender, ResolutionLoop, ResolutionLoopBuilder,
};
pub use session::{ChatSession, SessionConfig, SessionSummary};
pub use tool::{ResultSegment, Tool, ToolCatalog, ToolDescriptor, ToolInvoker, ToolRegistry};
