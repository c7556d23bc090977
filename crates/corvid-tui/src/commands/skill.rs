// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
#![allow(dead_code)]
//! Slash commands synthesized from discovered skills and subagents.
//!
//! Two families live here:
//! - [`CommandSlashCommand`] — one per user-authored `.cursor/commands/`-style
//!   skill, built by [`make_command_slash_commands`].
//! - [`AgentSlashCommand`] — one per discovered subagent markdown file, built
//!   by [`make_agent_slash_commands`].
//!
//! [`SkillCommand`]/[`discover_skills`] remain a stub pending SKILL.md-driven
//! (model-invoked) skill slash commands — distinct from the user commands
//! handled by [`make_command_slash_commands`] above.

use std::path::Path;

use corvid_runtime::{AgentInfo, SkillInfo};

use crate::commands::{
    CommandArgument, CommandContext, CommandResult, CompletionItem, SlashCommand,
};

/// A slash command backed by a discovered `SkillInfo` (e.g. a
/// `.cursor/commands/*.md` file). Executing it sends the skill body as the
/// user message, with any typed arguments appended.
pub struct CommandSlashCommand {
    name: String,
    description: String,
    content: String,
}

impl SlashCommand for CommandSlashCommand {
    fn name(&self) -> &str { &self.name }

    fn description(&self) -> &str { &self.description }

    fn complete(&self, _arg_index: usize, _partial: &str, _ctx: &CommandContext) -> Vec<CompletionItem> {
        vec![]
    }

    fn execute(&self, args: Vec<String>) -> CommandResult {
        let message = if args.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n\n{}", self.content, args.join(" "))
        };
        CommandResult {
            message_to_send: Some(message),
            ..Default::default()
        }
    }
}

/// Build one [`CommandSlashCommand`] per discovered skill.
pub fn make_command_slash_commands(commands: &[SkillInfo]) -> Vec<CommandSlashCommand> {
    commands
        .iter()
        .map(|c| CommandSlashCommand {
            name: c.command.clone(),
            description: c.description.clone(),
            content: c.content.clone(),
        })
        .collect()
}

/// A slash command that dispatches a user-typed task to a named subagent.
///
/// Executing forwards the remaining arguments as the task prompt and, when
/// the agent's frontmatter names a specific model, carries that override
/// through [`CommandResult::model_override`].
pub struct AgentSlashCommand {
    name: String,
    description: String,
    content: String,
    model: Option<String>,
}

impl SlashCommand for AgentSlashCommand {
    fn name(&self) -> &str { &self.name }

    fn description(&self) -> &str { &self.description }

    fn complete(&self, _arg_index: usize, _partial: &str, _ctx: &CommandContext) -> Vec<CompletionItem> {
        vec![]
    }

    fn execute(&self, args: Vec<String>) -> CommandResult {
        let task = args.join(" ");
        let message = if task.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n\n{}", self.content, task)
        };
        let model_override = match self.model.as_deref() {
            None | Some("inherit") | Some("") => None,
            Some(m) => Some(m.to_string()),
        };
        CommandResult {
            model_override,
            message_to_send: Some(message),
            ..Default::default()
        }
    }
}

/// Build one [`AgentSlashCommand`] per discovered subagent, named by the
/// lowercased agent name (falling back to the markdown file stem).
pub fn make_agent_slash_commands(agents: &[AgentInfo]) -> Vec<AgentSlashCommand> {
    agents
        .iter()
        .map(|a| {
            let name = if a.name.is_empty() {
                a.agent_md_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("agent")
                    .to_lowercase()
            } else {
                a.name.to_lowercase()
            };
            AgentSlashCommand {
                name,
                description: a.description.clone(),
                content: a.content.clone(),
                model: a.model.clone(),
            }
        })
        .collect()
}

/// A slash command backed by a `.corvid/skills/<name>/SKILL.md` file.
pub struct SkillCommand {
    pub name: String,
    pub path: std::path::PathBuf,
    // Future fields: description, arguments, template body
}

impl SlashCommand for SkillCommand {
    fn name(&self) -> &str { &self.name }

    fn description(&self) -> &str { "Skill command (from SKILL.md)" }

    fn arguments(&self) -> Vec<CommandArgument> {
        // Future: parse argument declarations from SKILL.md frontmatter
        vec![]
    }

    fn complete(&self, _arg_index: usize, _partial: &str, _ctx: &CommandContext) -> Vec<CompletionItem> {
        // Future: extract argument completion hints from SKILL.md
        vec![]
    }

    fn execute(&self, _args: Vec<String>) -> CommandResult {
        // Future: render SKILL.md template with args and return as message_to_send
        CommandResult::default()
    }
}

/// Scan `skills_dir` for skill commands.
///
/// **Currently returns an empty vec** (stub implementation).
pub async fn discover_skills(_skills_dir: &Path) -> Vec<SkillCommand> {
    // TODO: implement when Skills support is added
    vec![]
}
