// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use corvid_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Maximum output tokens reserved for the model's reply. Subtracted from
    /// `max_tokens` to get the usable input budget (see [`input_budget`]).
    pub max_output_tokens: usize,
    /// Token cost of items sent with every request but not stored in
    /// `messages` (tool schemas, dynamic context suffix). Recomputed by the
    /// caller before each budget check via `estimate_schema_overhead`.
    pub schema_overhead: usize,
    /// Running correction factor applied to the chars/4 token estimate,
    /// derived from the provider's actual reported input-token counts.
    /// Starts at 1.0 (no correction) and is updated by [`update_calibration`].
    pub calibration_factor: f32,
    /// Running total of prompt-cache-read tokens reported by the provider.
    pub cache_read_total: u64,
    /// Running total of prompt-cache-write tokens reported by the provider.
    pub cache_write_total: u64,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            calibration_factor: 1.0,
            cache_read_total: 0,
            cache_write_total: 0,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Usable input budget: the context window minus the reply reservation.
    pub fn input_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.max_output_tokens)
    }

    /// Calibrated token estimate plus the per-request schema overhead —
    /// what actually gets sent to the provider as input.
    fn effective_tokens(&self) -> usize {
        ((self.token_count as f32) * self.calibration_factor) as usize + self.schema_overhead
    }

    /// Fraction of the usable input budget consumed (0.0–1.0).
    pub fn context_fraction(&self) -> f32 {
        let budget = self.input_budget();
        if budget == 0 { return 0.0; }
        (self.effective_tokens() as f32) / (budget as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Record cache token usage reported by the provider for the turn just
    /// completed.
    pub fn add_cache_usage(&mut self, cache_read: u32, cache_write: u32) {
        self.cache_read_total += cache_read as u64;
        self.cache_write_total += cache_write as u64;
    }

    /// Fold a fresh actual-vs-estimated input token sample into the running
    /// calibration factor via an exponential moving average, so a single
    /// outlier turn can't swing the estimate wildly.
    pub fn update_calibration(&mut self, actual_input_tokens: u32, estimated_tokens: usize) {
        if estimated_tokens == 0 {
            return;
        }
        let sample = actual_input_tokens as f32 / estimated_tokens as f32;
        self.calibration_factor = self.calibration_factor * 0.7 + sample * 0.3;
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
