//! Pending-input FIFO for when a stream or agent run is in flight.
//!
//! While the main loop is mid-turn, user submissions are appended here
//! instead of dispatched immediately. Draining is three-phase: slash
//! commands that name a known agent run first, in submission order, as
//! fresh agent commands; everything else is concatenated with `"\n\n"`
//! and submitted as a single message. `/quit` never queues — callers are
//! expected to short-circuit on it before reaching [`PendingQueue::push`].

use std::collections::VecDeque;

/// One entry waiting to be dispatched once the current turn ends.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub content: String,
}

impl PendingEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// What a drained entry turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainAction {
    /// `/name rest...` where `name` is a known agent — dispatch as a new
    /// agent command, in the order it was queued.
    AgentCommand { agent_name: String, task: String },
    /// The remaining non-agent-command entries, concatenated with `"\n\n"`
    /// in queue order, submitted as one message. Omitted entirely (never
    /// emitted as an empty string) if nothing remains.
    Concatenated(String),
}

/// FIFO of queued user submissions, drained in the order spec.md §4.5
/// describes: all agent slash-commands first, then the rest as one
/// concatenated message.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    pub fn push(&mut self, content: impl Into<String>) {
        self.entries.push_back(PendingEntry::new(content));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove and return entry at `idx`, for editing/deletion from the UI
    /// queue panel. Preserves relative order of the rest.
    pub fn remove(&mut self, idx: usize) -> Option<PendingEntry> {
        self.entries.remove(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }

    /// Drains the whole queue into its dispatch actions, given a predicate
    /// that reports whether a bare name (without the leading `/`) names a
    /// known agent. Agent-command actions are returned in submission
    /// order, each as a separate [`DrainAction::AgentCommand`]; the
    /// remaining entries collapse into at most one trailing
    /// [`DrainAction::Concatenated`].
    pub fn drain(&mut self, mut is_known_agent: impl FnMut(&str) -> bool) -> Vec<DrainAction> {
        let mut actions = Vec::new();
        let mut rest: Vec<String> = Vec::new();

        for entry in self.entries.drain(..) {
            match parse_agent_command(&entry.content, &mut is_known_agent) {
                Some((agent_name, task)) => actions.push(DrainAction::AgentCommand { agent_name, task }),
                None => rest.push(entry.content),
            }
        }

        if !rest.is_empty() {
            actions.push(DrainAction::Concatenated(rest.join("\n\n")));
        }

        actions
    }
}

/// Parses `"/name rest of line"` into `(name, rest)` iff `name` is known.
/// Leading/trailing whitespace on `rest` is trimmed; `rest` may be empty.
fn parse_agent_command(content: &str, is_known_agent: &mut impl FnMut(&str) -> bool) -> Option<(String, String)> {
    let rest = content.strip_prefix('/')?;
    let (name, task) = match rest.split_once(char::is_whitespace) {
        Some((name, task)) => (name, task.trim()),
        None => (rest, ""),
    };
    if name.is_empty() || !is_known_agent(name) {
        return None;
    }
    Some((name.to_string(), task.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(names: &[&str]) -> impl FnMut(&str) -> bool + '_ {
        move |n: &str| names.contains(&n)
    }

    #[test]
    fn empty_queue_drains_to_nothing() {
        let mut q = PendingQueue::new();
        assert!(q.drain(known(&[])).is_empty());
    }

    #[test]
    fn plain_messages_concatenate_with_blank_line() {
        let mut q = PendingQueue::new();
        q.push("remember Y");
        q.push("remember Z");
        let actions = q.drain(known(&["planner"]));
        assert_eq!(actions, vec![DrainAction::Concatenated("remember Y\n\nremember Z".to_string())]);
    }

    #[test]
    fn scenario_e5_agent_commands_drain_before_concatenation() {
        // spec.md Scenario E5: /planner refactor X, remember Y, remember Z
        let mut q = PendingQueue::new();
        q.push("/planner refactor X");
        q.push("remember Y");
        q.push("remember Z");
        let actions = q.drain(known(&["planner"]));
        assert_eq!(
            actions,
            vec![
                DrainAction::AgentCommand { agent_name: "planner".to_string(), task: "refactor X".to_string() },
                DrainAction::Concatenated("remember Y\n\nremember Z".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_slash_name_treated_as_plain_text() {
        let mut q = PendingQueue::new();
        q.push("/nonexistent do a thing");
        let actions = q.drain(known(&["planner"]));
        assert_eq!(actions, vec![DrainAction::Concatenated("/nonexistent do a thing".to_string())]);
    }

    #[test]
    fn multiple_agent_commands_preserve_submission_order() {
        let mut q = PendingQueue::new();
        q.push("/planner one");
        q.push("/reviewer two");
        let actions = q.drain(known(&["planner", "reviewer"]));
        assert_eq!(
            actions,
            vec![
                DrainAction::AgentCommand { agent_name: "planner".to_string(), task: "one".to_string() },
                DrainAction::AgentCommand { agent_name: "reviewer".to_string(), task: "two".to_string() },
            ]
        );
    }

    #[test]
    fn bare_agent_command_with_no_task_text() {
        let mut q = PendingQueue::new();
        q.push("/planner");
        let actions = q.drain(known(&["planner"]));
        assert_eq!(
            actions,
            vec![DrainAction::AgentCommand { agent_name: "planner".to_string(), task: String::new() }]
        );
    }

    #[test]
    fn remove_drops_entry_and_preserves_order() {
        let mut q = PendingQueue::new();
        q.push("a");
        q.push("b");
        q.push("c");
        let removed = q.remove(1).unwrap();
        assert_eq!(removed.content, "b");
        let remaining: Vec<_> = q.iter().map(|e| e.content.clone()).collect();
        assert_eq!(remaining, vec!["a".to_string(), "c".to_string()]);
    }
}
