//! Content merge tools
//!
//! A tool receives four files: the ancestor, baseline and other versions and the path it must
//! write the result to. Built-in tools are named with a leading colon:
//!
//! | name        | behavior                                              |
//! |-------------|-------------------------------------------------------|
//! | `:merge`    | line-based diff3, conflict markers where sides overlap |
//! | `:union`    | diff3, keeping both sides of every overlap            |
//! | `:baseline` | take the baseline version                             |
//! | `:other`    | take the other version                                |
//! | `:skip`     | no automatic merge, the conflict is left to the user  |
//!
//! External tools come from `[[merge.tools]]` in the configuration. Their arguments may use the
//! `{ancestor}`, `{baseline}`, `{other}` and `{result}` placeholders.

use crate::artifacts::merge::diff3;
use crate::artifacts::objects::blob::Blob;
use crate::config::{ExternalToolConfig, MergeConfig};
use anyhow::Context;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

pub const TOOL_MERGE: &str = ":merge";
pub const TOOL_UNION: &str = ":union";
pub const TOOL_BASELINE: &str = ":baseline";
pub const TOOL_OTHER: &str = ":other";
pub const TOOL_SKIP: &str = ":skip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// The result holds no conflicts
    Clean,
    /// The result was written but still carries conflict markers
    Conflicts,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub result_exists: bool,
}

impl ToolOutcome {
    fn written(status: ToolStatus, result: &Path) -> Self {
        ToolOutcome {
            status,
            result_exists: result.is_file(),
        }
    }
}

pub trait MergeTool {
    fn name(&self) -> &str;

    /// Whether the tool runs without user interaction; its results are then disposable
    fn automatic(&self) -> bool;

    fn invoke(
        &self,
        ancestor: &Path,
        baseline: &Path,
        other: &Path,
        result: &Path,
    ) -> anyhow::Result<ToolOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    Merge,
    Union,
    Baseline,
    Other,
}

impl BuiltinTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            TOOL_MERGE => Some(BuiltinTool::Merge),
            TOOL_UNION => Some(BuiltinTool::Union),
            TOOL_BASELINE => Some(BuiltinTool::Baseline),
            TOOL_OTHER => Some(BuiltinTool::Other),
            _ => None,
        }
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read merge input {}", path.display()))
}

impl MergeTool for BuiltinTool {
    fn name(&self) -> &str {
        match self {
            BuiltinTool::Merge => TOOL_MERGE,
            BuiltinTool::Union => TOOL_UNION,
            BuiltinTool::Baseline => TOOL_BASELINE,
            BuiltinTool::Other => TOOL_OTHER,
        }
    }

    fn automatic(&self) -> bool {
        true
    }

    fn invoke(
        &self,
        ancestor: &Path,
        baseline: &Path,
        other: &Path,
        result: &Path,
    ) -> anyhow::Result<ToolOutcome> {
        let (content, status) = match self {
            BuiltinTool::Baseline => (read(baseline)?, ToolStatus::Clean),
            BuiltinTool::Other => (read(other)?, ToolStatus::Clean),
            BuiltinTool::Merge | BuiltinTool::Union => {
                let (ancestor, baseline, other) = (read(ancestor)?, read(baseline)?, read(other)?);
                let merged = diff3::merge(&ancestor, &baseline, &other);
                match (self, merged.is_clean()) {
                    (BuiltinTool::Union, _) => (merged.union(), ToolStatus::Clean),
                    (_, true) => (merged.with_markers(), ToolStatus::Clean),
                    (_, false) => {
                        debug!(conflicts = merged.conflicts(), "diff3 left conflicts");
                        (merged.with_markers(), ToolStatus::Conflicts)
                    }
                }
            }
        };

        std::fs::write(result, content)
            .with_context(|| format!("failed to write merge result {}", result.display()))?;
        Ok(ToolOutcome::written(status, result))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTool {
    config: ExternalToolConfig,
}

impl ExternalTool {
    pub fn new(config: ExternalToolConfig) -> Self {
        ExternalTool { config }
    }
}

impl MergeTool for ExternalTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn automatic(&self) -> bool {
        self.config.automatic
    }

    fn invoke(
        &self,
        ancestor: &Path,
        baseline: &Path,
        other: &Path,
        result: &Path,
    ) -> anyhow::Result<ToolOutcome> {
        let args = self
            .config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{ancestor}", &ancestor.to_string_lossy())
                    .replace("{baseline}", &baseline.to_string_lossy())
                    .replace("{other}", &other.to_string_lossy())
                    .replace("{result}", &result.to_string_lossy())
            })
            .collect::<Vec<_>>();

        debug!(tool = %self.config.name, command = %self.config.command, ?args, "running merge tool");
        let status = match Command::new(&self.config.command).args(&args).status() {
            Ok(status) => status,
            Err(error) => {
                warn!(tool = %self.config.name, %error, "merge tool could not be started");
                return Ok(ToolOutcome::written(ToolStatus::Failed, result));
            }
        };

        let status = match status.code() {
            Some(0) => ToolStatus::Clean,
            Some(code) if Some(code) == self.config.conflict_exit_code => ToolStatus::Conflicts,
            _ => ToolStatus::Failed,
        };
        Ok(ToolOutcome::written(status, result))
    }
}

/// What the rules say about one file
pub enum ToolChoice {
    Tool(Box<dyn MergeTool>),
    /// Binary content or an explicit `:skip`
    NoRule,
}

impl std::fmt::Debug for ToolChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolChoice::Tool(tool) => f.debug_tuple("Tool").field(&tool.name()).finish(),
            ToolChoice::NoRule => f.write_str("NoRule"),
        }
    }
}

/// Translate a path glob into an anchored regex
///
/// `**` crosses directory boundaries, `*` and `?` do not.
pub fn glob_to_regex(pattern: &str) -> anyhow::Result<Regex> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    regex.push_str("(?:.*/)?");
                } else {
                    regex.push_str(".*");
                }
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex).with_context(|| format!("invalid path pattern {pattern:?}"))
}

#[derive(Debug)]
pub struct ToolSelector {
    rules: Vec<(Regex, bool, String)>,
    tools: Vec<ExternalToolConfig>,
}

impl ToolSelector {
    pub fn new(config: &MergeConfig) -> anyhow::Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                Ok((
                    glob_to_regex(&rule.pattern)?,
                    rule.pattern.contains('/'),
                    rule.tool.clone(),
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(ToolSelector {
            rules,
            tools: config.tools.clone(),
        })
    }

    /// Pick the tool for a file from its repo path and the contents to merge
    ///
    /// A pattern without a slash is matched against the file name only. Binary content never
    /// gets a tool; files no rule matches use `:merge`.
    pub fn select(&self, path: &Path, contents: &[Blob]) -> anyhow::Result<ToolChoice> {
        if contents.iter().any(Blob::is_binary) {
            return Ok(ToolChoice::NoRule);
        }

        let full = path.to_string_lossy().replace('\\', "/");
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let name = self
            .rules
            .iter()
            .find(|(regex, anchored, _)| {
                if *anchored {
                    regex.is_match(&full)
                } else {
                    regex.is_match(&file_name)
                }
            })
            .map(|(_, _, tool)| tool.as_str())
            .unwrap_or(TOOL_MERGE);

        self.by_name(name)
    }

    pub fn by_name(&self, name: &str) -> anyhow::Result<ToolChoice> {
        if name == TOOL_SKIP {
            return Ok(ToolChoice::NoRule);
        }
        if let Some(builtin) = BuiltinTool::from_name(name) {
            return Ok(ToolChoice::Tool(Box::new(builtin)));
        }

        self.tools
            .iter()
            .find(|tool| tool.name == name)
            .map(|tool| ToolChoice::Tool(Box::new(ExternalTool::new(tool.clone()))))
            .with_context(|| format!("merge rule names unknown tool {name:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeRuleConfig;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn selector() -> ToolSelector {
        ToolSelector::new(&MergeConfig {
            rules: vec![
                MergeRuleConfig {
                    pattern: "*.lock".to_string(),
                    tool: TOOL_OTHER.to_string(),
                },
                MergeRuleConfig {
                    pattern: "docs/**/*.md".to_string(),
                    tool: TOOL_UNION.to_string(),
                },
                MergeRuleConfig {
                    pattern: "vendor/**".to_string(),
                    tool: TOOL_SKIP.to_string(),
                },
            ],
            tools: Vec::new(),
        })
        .unwrap()
    }

    fn text() -> Blob {
        Blob::new(Bytes::from_static(b"text\n"))
    }

    fn chosen(choice: ToolChoice) -> Option<String> {
        match choice {
            ToolChoice::Tool(tool) => Some(tool.name().to_string()),
            ToolChoice::NoRule => None,
        }
    }

    #[rstest]
    #[case::file_name_rule("deep/nested/Cargo.lock", Some(TOOL_OTHER))]
    #[case::path_rule("docs/guide/intro.md", Some(TOOL_UNION))]
    #[case::path_rule_directly_below("docs/intro.md", Some(TOOL_UNION))]
    #[case::skip("vendor/lib/code.c", None)]
    #[case::fallback("src/main.rs", Some(TOOL_MERGE))]
    fn rules_pick_the_first_matching_tool(
        selector: ToolSelector,
        #[case] path: &str,
        #[case] expected: Option<&str>,
    ) -> anyhow::Result<()> {
        let choice = selector.select(Path::new(path), &[text()])?;

        assert_eq!(chosen(choice), expected.map(str::to_string));
        Ok(())
    }

    #[rstest]
    fn binary_content_has_no_rule(selector: ToolSelector) -> anyhow::Result<()> {
        let choice = selector.select(
            Path::new("image.txt"),
            &[text(), Blob::new(Bytes::from_static(b"\x89PNG\0\0"))],
        )?;

        assert_eq!(chosen(choice), None);
        Ok(())
    }

    #[rstest]
    fn unknown_tools_are_reported(selector: ToolSelector) {
        assert!(selector.by_name("kdiff3").is_err());
    }

    #[rstest]
    fn builtin_merge_writes_the_result() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        dir.child("a").write_str("one\ntwo\nthree\n")?;
        dir.child("b").write_str("ONE\ntwo\nthree\n")?;
        dir.child("c").write_str("one\ntwo\nTHREE\n")?;
        let result = dir.child("r");

        let outcome = BuiltinTool::Merge.invoke(
            dir.child("a").path(),
            dir.child("b").path(),
            dir.child("c").path(),
            result.path(),
        )?;

        assert_eq!(
            outcome,
            ToolOutcome {
                status: ToolStatus::Clean,
                result_exists: true
            }
        );
        result.assert("ONE\ntwo\nTHREE\n");
        Ok(())
    }

    #[rstest]
    fn external_tool_exit_codes_are_classified() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let tool = |command: &str, code: Option<i32>| {
            ExternalTool::new(ExternalToolConfig {
                name: "sh".to_string(),
                command: command.to_string(),
                args: vec!["{result}".to_string()],
                automatic: false,
                conflict_exit_code: code,
            })
        };
        let (a, r) = (dir.child("a"), dir.child("r"));

        let missing =
            tool("grove-no-such-merge-tool", None).invoke(a.path(), a.path(), a.path(), r.path())?;
        let ok = tool("true", None).invoke(a.path(), a.path(), a.path(), r.path())?;
        let conflicted = tool("false", Some(1)).invoke(a.path(), a.path(), a.path(), r.path())?;

        assert_eq!(missing.status, ToolStatus::Failed);
        assert_eq!(ok.status, ToolStatus::Clean);
        assert!(!ok.result_exists);
        assert_eq!(conflicted.status, ToolStatus::Conflicts);
        Ok(())
    }
}
