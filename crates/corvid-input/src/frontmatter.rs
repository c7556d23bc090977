// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

/// Metadata parsed from simple YAML-style frontmatter at the top of a
/// workflow file.
///
/// Frontmatter is delimited by `---` on its own line:
///
/// ```markdown
/// ---
/// title: My Workflow
/// models:
///   agent: claude-haiku-4-5
///   research: claude-opus-4-5
/// vars:
///   branch: main
///   pr_number: "42"
/// ---
///
/// ## Step one
/// ...
/// ```
///
/// The default agent mode is `agent` and the default model is `claude-haiku-4-5`.
/// Per-mode model overrides (from the `models:` map) take effect when a step
/// uses `<!-- corvid: mode=research -->` or similar inline directives.
/// CLI `--model` always takes the highest priority.
///
/// Fields removed compared to the original schema (use CLI flags or config instead):
/// - `mode` (was: override default agent mode)
/// - `model` (was: bare model override — use `models:` map now)
/// - `step_timeout_secs` (was: per-step timeout)
/// - `run_timeout_secs` (was: total run timeout)
#[derive(Debug, Clone, Default)]
pub struct WorkflowMetadata {
    /// Human-readable title (also used as conversation title in output)
    pub title: Option<String>,
    /// Per-mode model map: `mode_name -> model_id`.
    /// For example `{"agent": "claude-haiku-4-5", "research": "claude-opus-4-5"}`.
    /// When a step switches to a mode that has an entry here, that model is
    /// used unless an explicit `--model` CLI flag or inline `model=` step tag
    /// overrides it.
    pub models: Option<HashMap<String, String>>,
    /// Template variables, substituted as `{{key}}` in step content.
    /// Override with CLI `--var KEY=VALUE`; environment variables provide a
    /// final fallback (see `apply_template`).
    pub vars: Option<HashMap<String, String>>,
}

/// Parse optional YAML-style frontmatter from a markdown workflow string.
///
/// Returns `(metadata, remaining_markdown)`.  If no frontmatter is found
/// `metadata` is `None` and `remaining_markdown` is the whole input.
pub fn parse_frontmatter(content: &str) -> (Option<WorkflowMetadata>, &str) {
    // Frontmatter must start at the very first line with "---"
    let header = if let Some(rest) = content.strip_prefix("---\n") {
        rest
    } else if let Some(rest) = content.strip_prefix("---\r\n") {
        rest
    } else {
        return (None, content);
    };

    // Find closing "---" on its own line
    let close_unix = header.find("\n---\n");
    let close_crlf = header.find("\n---\r\n");

    let (yaml_end, md_start_offset) = match (close_unix, close_crlf) {
        (Some(u), Some(c)) if u <= c => (u, "\n---\n".len()),
        (_, Some(c)) => (c, "\n---\r\n".len()),
        (Some(u), _) => (u, "\n---\n".len()),
        (None, None) => return (None, content),
    };

    let yaml_src = &header[..yaml_end];
    let remaining = &header[yaml_end + md_start_offset..];

    match parse_simple_yaml(yaml_src) {
        Some(meta) => (Some(meta), remaining),
        None => (None, content),
    }
}

/// Minimal YAML-subset parser supporting:
/// - Top-level string fields: `key: value` (with optional quotes)
/// - A `vars:` section with indented `  key: value` entries
/// - A `models:` section with indented `  mode: model_id` entries
fn parse_simple_yaml(src: &str) -> Option<WorkflowMetadata> {
    let mut meta = WorkflowMetadata::default();
    // Which top-level section we are currently inside ("vars" | "models" | "")
    let mut current_section = "";
    let mut vars: HashMap<String, String> = HashMap::new();
    let mut models: HashMap<String, String> = HashMap::new();

    for line in src.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        // Indented line: belongs to the current section
        if !current_section.is_empty() && (line.starts_with(' ') || line.starts_with('\t')) {
            if let Some((k, v)) = split_kv(line.trim()) {
                match current_section {
                    "vars" => {
                        vars.insert(k, v);
                    }
                    "models" => {
                        models.insert(k, v);
                    }
                    _ => {}
                }
            }
            continue;
        } else if line.starts_with(' ') || line.starts_with('\t') {
            // Indented but no active section — ignore
            continue;
        } else {
            // Non-indented line: close any open section
            current_section = "";
        }

        if let Some((key, val)) = split_kv(line) {
            match key.as_str() {
                "title" => meta.title = Some(val),
                "vars" => {
                    if val.is_empty() {
                        current_section = "vars";
                    }
                }
                "models" => {
                    if val.is_empty() {
                        current_section = "models";
                    }
                }
                // Silently ignore unknown / removed keys for forward compat
                _ => {}
            }
        }
    }

    if !vars.is_empty() {
        meta.vars = Some(vars);
    }
    if !models.is_empty() {
        meta.models = Some(models);
    }

    Some(meta)
}

/// Split `key: value` into `(key, value)`.  Handles quoted values and
/// strips surrounding whitespace / quotes.  Returns `None` if there is no
/// `:` separator or if the key is empty.
fn split_kv(s: &str) -> Option<(String, String)> {
    let colon = s.find(':')?;
    let key = s[..colon].trim().to_string();
    if key.is_empty() {
        return None;
    }
    let raw_val = s[colon + 1..].trim();
    let val = unquote(raw_val).to_string();
    Some((key, val))
}

/// Strip a single layer of matching `"..."` or `'...'` quotes if present.
fn unquote(s: &str) -> &str {
    if (s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')) {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
