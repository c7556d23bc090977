// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The full permission policy engine: tool risk metadata, rule-based
//! allow/deny/ask policies, glob path matching, session grants.
//!
//! This supersedes [`crate::policy::ToolPolicy`] for tools that want the
//! richer scope/risk model.  `ToolPolicy` is kept for the shell-command glob
//! matching it already does well; `PermissionManager` is the evaluation
//! entry point new call sites should use.

use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

/// How dangerous a tool invocation is, independent of what it's asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

/// A capability a tool needs in order to run.  Policies are keyed by scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    ReadFiles,
    WriteFiles,
    Execute,
    Network,
    SystemInfo,
    Todo,
}

/// Static per-tool metadata consulted by the policy engine.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub required_scopes: Vec<Scope>,
}

/// The four-way decision a [`Policy`] can produce.
///
/// `AllowOnce` and `AskEachTime` both prompt the user on first encounter;
/// they differ in what happens afterward (see [`PermissionManager::resolve`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    AlwaysAllow,
    AllowOnce,
    AskEachTime,
    Deny,
}

/// A configured rule matching a scope, refined by argument globs.
///
/// Deny globs are checked before allow globs.  A policy with no globs at all
/// matches every call that requests `scope`.
#[derive(Debug, Clone)]
pub struct Policy {
    pub scope: Scope,
    pub mode: PolicyMode,
    pub allow_globs: Vec<String>,
    pub deny_globs: Vec<String>,
}

impl Policy {
    pub fn new(scope: Scope, mode: PolicyMode) -> Self {
        Self {
            scope,
            mode,
            allow_globs: Vec::new(),
            deny_globs: Vec::new(),
        }
    }

    pub fn with_allow_globs(mut self, globs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deny_globs(mut self, globs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deny_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    /// True when `argument` (typically a path or command string extracted
    /// from the tool call's JSON arguments) matches this policy.  A policy
    /// with empty glob lists matches unconditionally; deny globs are
    /// checked first.
    fn matches(&self, argument: &str) -> bool {
        if self.deny_globs.iter().any(|g| glob_matches(g, argument)) {
            return false;
        }
        if self.allow_globs.is_empty() {
            return true;
        }
        self.allow_globs.iter().any(|g| glob_matches(g, argument))
    }
}

/// A transient, process-lifetime override granted by the user for a single
/// `(tool_name, scope)` pair.  Never persisted to disk.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub tool_name: String,
    pub scope: Scope,
    pub granted_at: u64,
}

/// The outcome of evaluating a tool call against the policy engine, before
/// any user interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Run immediately; no user interaction needed.
    Auto,
    /// Prompt the user.  `show_preview` is true for medium/high risk tools
    /// (critical tools always show a preview regardless of this flag).
    AskUser { show_preview: bool },
    /// Refuse outright; the call never reaches the tool executor.
    Deny,
}

/// The decision a user makes in response to an `AskUser` prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDecision {
    AllowOnce,
    SessionGrant,
    AlwaysAllow,
    Deny,
}

/// Why a particular call was or wasn't allowed to run — recorded to the
/// audit trail alongside every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDecision {
    AutoApproved,
    UserApproved,
    DeniedByPolicy,
    DeniedByUser,
    FailedValidation,
}

/// The policy engine, session-grant cache, and single-pending-permission
/// state machine described in spec §4.3.
///
/// Only one permission prompt may be outstanding at a time across the whole
/// process — `pending` tracks that invariant so callers can assert it rather
/// than accidentally overlapping two prompts.
pub struct PermissionManager {
    policies: Vec<Policy>,
    grants: Vec<SessionGrant>,
    pending: bool,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionManager {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
            grants: Vec::new(),
            pending: false,
        }
    }

    pub fn add_policy(&mut self, policy: Policy) {
        self.policies.push(policy);
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    /// Evaluate a tool call before dispatch.  Steps, in order, per spec §4.3:
    ///
    /// 1. `risk_level = safe` ⇒ auto-approve.
    /// 2. `risk_level = critical` ⇒ always ask, always show a preview — a
    ///    session grant never bypasses this, so a critical tool always gets
    ///    explicit approval even after the user has granted it once before.
    /// 3. A matching session grant ⇒ auto-approve (short-circuits policy
    ///    lookup entirely).
    /// 4. The first policy whose scope is required by the tool and whose
    ///    globs match `argument` decides.
    /// 5. No match ⇒ ask; preview shown only for medium/high risk.
    pub fn evaluate(&mut self, tool: &ToolMetadata, argument: &str) -> PermissionDecision {
        if tool.risk_level == RiskLevel::Safe {
            return PermissionDecision::Auto;
        }

        if tool.risk_level == RiskLevel::Critical {
            return PermissionDecision::AskUser { show_preview: true };
        }

        if tool
            .required_scopes
            .iter()
            .any(|scope| self.has_grant(&tool.name, *scope))
        {
            return PermissionDecision::Auto;
        }

        for scope in &tool.required_scopes {
            if let Some(policy) = self
                .policies
                .iter()
                .find(|p| p.scope == *scope && p.matches(argument))
            {
                return match policy.mode {
                    PolicyMode::AlwaysAllow => PermissionDecision::Auto,
                    PolicyMode::Deny => PermissionDecision::Deny,
                    PolicyMode::AllowOnce | PolicyMode::AskEachTime => PermissionDecision::AskUser {
                        show_preview: matches!(tool.risk_level, RiskLevel::Medium | RiskLevel::High),
                    },
                };
            }
        }

        PermissionDecision::AskUser {
            show_preview: matches!(tool.risk_level, RiskLevel::Medium | RiskLevel::High),
        }
    }

    /// Record that a prompt is now outstanding.  Callers must call
    /// [`PermissionManager::resolve`] (which clears this) before evaluating
    /// another call.
    pub fn begin_pending(&mut self) {
        self.pending = true;
    }

    /// Apply the user's response to a pending prompt and return the audit
    /// decision to record.
    ///
    /// `allow_once` authorizes exactly this call and installs nothing —
    /// the next matching call asks again.  `session_grant` installs a
    /// [`SessionGrant`] so subsequent calls
    /// for the same `(tool, scope)` auto-approve for the rest of the process.
    /// `always_allow` additionally installs an `always_allow` [`Policy`] for
    /// the tool's first required scope so future evaluations short-circuit
    /// without even checking grants.
    pub fn resolve(
        &mut self,
        tool: &ToolMetadata,
        decision: UserDecision,
        now: u64,
    ) -> AuditDecision {
        self.pending = false;
        match decision {
            UserDecision::AllowOnce => AuditDecision::UserApproved,
            UserDecision::SessionGrant => {
                if let Some(scope) = tool.required_scopes.first() {
                    self.grants.push(SessionGrant {
                        tool_name: tool.name.clone(),
                        scope: *scope,
                        granted_at: now,
                    });
                }
                AuditDecision::UserApproved
            }
            UserDecision::AlwaysAllow => {
                if let Some(scope) = tool.required_scopes.first() {
                    self.policies
                        .push(Policy::new(*scope, PolicyMode::AlwaysAllow));
                }
                AuditDecision::UserApproved
            }
            UserDecision::Deny => AuditDecision::DeniedByUser,
        }
    }

    fn has_grant(&self, tool_name: &str, scope: Scope) -> bool {
        self.grants
            .iter()
            .any(|g| g.tool_name == tool_name && g.scope == scope)
    }
}

/// Extract the single string a glob policy matches against from a tool
/// call's JSON arguments: the first of a handful of conventional field
/// names used across the built-in tools (`path`, `file_path`, `command`,
/// `pattern`, `url`), falling back to the whole arguments object rendered
/// as text when none of those keys are present.
pub fn tool_call_argument(args: &serde_json::Value) -> String {
    const KEYS: &[&str] = &["path", "file_path", "command", "pattern", "url", "query"];
    if let Some(obj) = args.as_object() {
        for key in KEYS {
            if let Some(s) = obj.get(*key).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
    }
    args.to_string()
}

/// Current time as Unix seconds. Used for [`SessionGrant::granted_at`] /
/// [`crate::audit::AuditEvent::timestamp`] by callers that don't already
/// track a clock.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Minimal glob matcher: exact match, `*` (match anything), `*.ext`
/// (suffix), and `prefix/**` (prefix plus its entire subtree, including
/// `prefix/` itself).
pub fn glob_matches(pattern: &str, value: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return value == prefix || value.starts_with(&format!("{prefix}/"));
    }
    if let Some(ext) = pattern.strip_prefix('*') {
        if !ext.contains('*') {
            return value.ends_with(ext);
        }
    }
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') && !pattern.contains('?') {
        return value == pattern;
    }
    glob_to_regex(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, risk: RiskLevel, scopes: &[Scope]) -> ToolMetadata {
        ToolMetadata {
            name: name.into(),
            description: String::new(),
            risk_level: risk,
            required_scopes: scopes.to_vec(),
        }
    }

    #[test]
    fn safe_tools_auto_approve() {
        let mut pm = PermissionManager::new();
        let t = meta("list_dir", RiskLevel::Safe, &[Scope::ReadFiles]);
        assert_eq!(pm.evaluate(&t, "."), PermissionDecision::Auto);
    }

    #[test]
    fn critical_tools_always_ask_with_preview() {
        let mut pm = PermissionManager::new();
        let t = meta("shell", RiskLevel::Critical, &[Scope::Execute]);
        assert_eq!(
            pm.evaluate(&t, "rm -rf /"),
            PermissionDecision::AskUser { show_preview: true }
        );
    }

    #[test]
    fn session_grant_short_circuits_policy() {
        let mut pm = PermissionManager::new();
        let t = meta("write_file", RiskLevel::Medium, &[Scope::WriteFiles]);
        pm.resolve(&t, UserDecision::SessionGrant, 1);
        assert_eq!(pm.evaluate(&t, "foo.rs"), PermissionDecision::Auto);
    }

    #[test]
    fn session_grant_never_bypasses_critical() {
        let mut pm = PermissionManager::new();
        let t = meta("shell", RiskLevel::Critical, &[Scope::Execute]);
        pm.resolve(&t, UserDecision::SessionGrant, 1);
        assert_eq!(
            pm.evaluate(&t, "rm -rf /"),
            PermissionDecision::AskUser { show_preview: true }
        );
    }

    #[test]
    fn always_allow_policy_persists_across_calls() {
        let mut pm = PermissionManager::new();
        let t = meta("write_file", RiskLevel::Medium, &[Scope::WriteFiles]);
        pm.resolve(&t, UserDecision::AlwaysAllow, 1);
        assert_eq!(pm.evaluate(&t, "a.rs"), PermissionDecision::Auto);
        assert_eq!(pm.evaluate(&t, "b.rs"), PermissionDecision::Auto);
    }

    #[test]
    fn deny_policy_beats_ask() {
        let mut pm = PermissionManager::new();
        pm.add_policy(
            Policy::new(Scope::Execute, PolicyMode::Deny).with_deny_globs(["rm -rf /*"]),
        );
        let t = meta("shell", RiskLevel::High, &[Scope::Execute]);
        assert_eq!(pm.evaluate(&t, "rm -rf /tmp/x"), PermissionDecision::Deny);
    }

    #[test]
    fn allow_glob_restricts_scope() {
        let mut pm = PermissionManager::new();
        pm.add_policy(
            Policy::new(Scope::WriteFiles, PolicyMode::AlwaysAllow)
                .with_allow_globs(["src/**"]),
        );
        let t = meta("write_file", RiskLevel::Medium, &[Scope::WriteFiles]);
        assert_eq!(pm.evaluate(&t, "src/main.rs"), PermissionDecision::Auto);
        assert_eq!(
            pm.evaluate(&t, "/etc/passwd"),
            PermissionDecision::AskUser { show_preview: true }
        );
    }

    #[test]
    fn no_match_falls_through_to_ask() {
        let mut pm = PermissionManager::new();
        let t = meta("run_terminal_command", RiskLevel::Low, &[Scope::Execute]);
        assert_eq!(
            pm.evaluate(&t, "cargo build"),
            PermissionDecision::AskUser { show_preview: false }
        );
    }

    #[test]
    fn resolve_deny_does_not_install_grant() {
        let mut pm = PermissionManager::new();
        let t = meta("write_file", RiskLevel::Medium, &[Scope::WriteFiles]);
        assert_eq!(
            pm.resolve(&t, UserDecision::Deny, 1),
            AuditDecision::DeniedByUser
        );
        assert_eq!(
            pm.evaluate(&t, "x.rs"),
            PermissionDecision::AskUser { show_preview: true }
        );
    }

    #[test]
    fn allow_once_does_not_persist() {
        let mut pm = PermissionManager::new();
        let t = meta("write_file", RiskLevel::Medium, &[Scope::WriteFiles]);
        assert_eq!(
            pm.resolve(&t, UserDecision::AllowOnce, 1),
            AuditDecision::UserApproved
        );
        // No grant or policy was installed — next call asks again.
        assert_eq!(
            pm.evaluate(&t, "x.rs"),
            PermissionDecision::AskUser { show_preview: true }
        );
    }

    // ── Glob matcher ─────────────────────────────────────────────────────────

    #[test]
    fn glob_exact_match() {
        assert!(glob_matches("foo.rs", "foo.rs"));
        assert!(!glob_matches("foo.rs", "bar.rs"));
    }

    #[test]
    fn glob_star_matches_anything() {
        assert!(glob_matches("*", "anything at all"));
    }

    #[test]
    fn glob_suffix_extension() {
        assert!(glob_matches("*.ext", "file.ext"));
        assert!(!glob_matches("*.ext", "file.ext2"));
        assert!(!glob_matches("*.ext", "extfile"));
    }

    #[test]
    fn glob_prefix_subtree_matches_root_and_children() {
        assert!(glob_matches("prefix/**", "prefix/"));
        assert!(glob_matches("prefix/**", "prefix/anything"));
        assert!(glob_matches("prefix/**", "prefix/a/b/c"));
        assert!(!glob_matches("prefix/**", "other/anything"));
    }

    #[test]
    fn glob_prefix_subtree_excludes_bare_prefix_without_slash() {
        // "prefix" itself (no trailing content) only matches via the `value
        // == prefix` branch, which requires the exact bare prefix string.
        assert!(glob_matches("prefix/**", "prefix"));
    }

    #[test]
    fn tool_call_argument_prefers_path() {
        let args = serde_json::json!({"path": "src/main.rs", "other": "x"});
        assert_eq!(tool_call_argument(&args), "src/main.rs");
    }

    #[test]
    fn tool_call_argument_falls_back_to_whole_object() {
        let args = serde_json::json!({"unrelated_field": 1});
        assert_eq!(tool_call_argument(&args), args.to_string());
    }

    #[test]
    fn pending_flag_tracks_outstanding_prompt() {
        let mut pm = PermissionManager::new();
        assert!(!pm.pending());
        pm.begin_pending();
        assert!(pm.pending());
        let t = meta("write_file", RiskLevel::Medium, &[Scope::WriteFiles]);
        pm.resolve(&t, UserDecision::AllowOnce, 1);
        assert!(!pm.pending());
    }
}
