// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use corvid_config::AgentMode;
use corvid_tools::permissions::{ToolMetadata, UserDecision};
use corvid_tools::{events::TodoItem, ToolCall};

/// Which compaction strategy actually ran, reported for display/logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Rolling LLM summary, keeping a structured bullet digest of older turns.
    Structured,
    /// Rolling LLM summary, keeping a narrative prose digest of older turns.
    Narrative,
    /// Old messages dropped without a model call (compaction prompt itself
    /// would have overflowed the budget, or the summarization call failed).
    Emergency,
}

/// Events emitted by the agent during a single turn.
/// Consumers (CI runner, TUI) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// A tool call is paused awaiting a permission decision from the user.
    /// The executor blocks this call (and every later call in the same
    /// batch) until a matching `PermissionResolved` arrives on the
    /// resolution channel the permission manager hands back to the caller.
    PermissionRequest {
        call: ToolCall,
        metadata: ToolMetadata,
        /// Preview text (e.g. a diff or command line) shown to the user
        /// ahead of the 1/2/3/4 prompt, when the risk level warrants it.
        preview: Option<String>,
    },
    /// The user (or an auto-resolution path) decided on a pending permission
    /// request. Only ever observed by the TUI layer driving the prompt;
    /// the executor itself awaits the decision via a oneshot channel rather
    /// than by re-reading the event stream.
    PermissionResolved {
        call_id: String,
        decision: UserDecision,
    },
    /// Context was compacted; statistics for the UI
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        turn: u32,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        /// Running total of cache-read tokens across the whole session.
        cache_read_total: u64,
        /// Running total of cache-write tokens across the whole session.
        cache_write_total: u64,
        /// The context window budget in effect for the active model.
        max_tokens: usize,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// A streaming turn was interrupted (cancellation or `/quit`-style abort).
    /// `partial_text` is whatever had already streamed before the abort;
    /// the caller has already committed it to the session as an assistant
    /// message if non-empty.
    Aborted { partial_text: String },
    /// A recoverable error occurred
    Error(String),
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// The agent is asking the user a question (id links to QuestionAnswer)
    Question { id: String, questions: Vec<String> },
    /// Answer to a previous Question event
    QuestionAnswer { id: String, answer: String },
}

/// Outcome of a subagent run to completion, returned by
/// `Agent::run_to_completion` / `Agent::resume_with_user_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// The run finished a turn normally (no pending tool calls or pause).
    TurnComplete,
    /// `capabilities.conversation_mode` was set and the model produced a
    /// tool-call-free turn; the caller should supply the next user input via
    /// `resume_with_user_input` to continue.
    NeedsInput,
    /// The run failed before completing a turn (provider error).
    Error,
}

/// Token/tool-call counters accumulated over a `run_to_completion` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentRunStats {
    pub tool_calls_made: u32,
    pub rounds_used: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Synchronous summary of a subagent run, built by draining the
/// `AgentEvent` stream a `run_to_completion` call produces internally.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub content: String,
    pub thinking: Option<String>,
    pub stats: AgentRunStats,
    pub error: Option<String>,
}
