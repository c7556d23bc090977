// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Tool-call replay: re-execute recorded tool calls with fresh results.
//!
//! This is used by `--rerun-toolcalls` to replay all tool calls in a loaded
//! JSONL conversation, updating the tool-result messages in-place before
//! seeding the agent.  The model's text responses are preserved so that the
//! re-run reflects the original reasoning with updated tool outputs.

use std::sync::Arc;

use corvid_input::ConversationRecord;
use corvid_model::{Message, MessageContent, Role};
use corvid_tools::{ToolCall, ToolRegistry};

/// Return true if `record` is a ToolResult message with the given call id.
fn is_tool_result_for(record: &ConversationRecord, id: &str) -> bool {
    if let ConversationRecord::Message(Message {
        role: Role::Tool,
        content: MessageContent::ToolResult { tool_call_id, .. },
    }) = record
    {
        tool_call_id == id
    } else {
        false
    }
}

/// Re-execute all tool calls in `records` with fresh results.
///
/// Iterates the records in order, finds each assistant `ToolCall` message, runs
/// the corresponding tool via `tools`, then locates the immediately following
/// `ToolResult` record for the same `tool_call_id` and replaces its content
/// with the new output.
///
/// Returns the number of tool calls that were replayed.
pub async fn replay_tool_calls(
    records: &mut [ConversationRecord],
    tools: &Arc<ToolRegistry>,
) -> usize {
    let mut replayed = 0;

    // Collect (index, tool_call_id, name, args) for all assistant ToolCall records
    // so we can mutate the slice afterwards without conflicting borrows.
    let call_sites: Vec<(usize, String, String, String)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            if let ConversationRecord::Message(Message {
                role: Role::Assistant,
                content:
                    MessageContent::ToolCall {
                        tool_call_id,
                        function,
                    },
            }) = record
            {
                Some((
                    i,
                    tool_call_id.clone(),
                    function.name.clone(),
                    function.arguments.clone(),
                ))
            } else {
                None
            }
        })
        .collect();

    for (call_idx, tool_call_id, name, args_json) in call_sites {
        // Parse the stored JSON arguments.
        let args = serde_json::from_str::<serde_json::Value>(&args_json)
            .unwrap_or(serde_json::Value::Object(Default::default()));

        // Execute the tool call with fresh inputs.
        let tc = ToolCall {
            id: tool_call_id.clone(),
            name,
            args,
        };
        let output = tools.execute(&tc).await;

        // Find the matching ToolResult record after the call and update it in place.
        let after_call = &mut records[call_idx + 1..];
        let mut found = false;
        for slot in after_call.iter_mut() {
            if is_tool_result_for(slot, &tool_call_id) {
                *slot = ConversationRecord::Message(Message::tool_result(
                    &tool_call_id,
                    &output.content,
                ));
                found = true;
                break;
            }
        }
        if found {
            replayed += 1;
        }
    }

    replayed
}
