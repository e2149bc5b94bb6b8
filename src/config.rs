//! Working-copy configuration
//!
//! Read from `.grove/config.toml`. Every section and field is optional; a missing file is the
//! same as an empty one.
//!
//! ```toml
//! [portability]
//! rules = ["CASE", "NORMALIZATION"]
//!
//! [attributes]
//! executable = true
//!
//! [[merge.rules]]
//! pattern = "*.lock"
//! tool = ":baseline"
//!
//! [[merge.tools]]
//! name = "kdiff"
//! command = "kdiff3"
//! args = ["--auto", "{ancestor}", "{baseline}", "{other}", "-o", "{result}"]
//! automatic = false
//!
//! [author]
//! name = "Jane Doe"
//! email = "jane@example.com"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use crate::artifacts::portability::PortabilityFlags;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Attribute bit recording the executable permission
pub const ATTR_EXECUTABLE: u64 = 0o1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WcConfig {
    pub portability: PortabilityConfig,
    pub attributes: AttributesConfig,
    pub merge: MergeConfig,
    pub author: AuthorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortabilityConfig {
    /// Names of the active `PortabilityFlags`
    pub rules: Vec<String>,
}

impl Default for PortabilityConfig {
    fn default() -> Self {
        Self {
            rules: PortabilityFlags::all()
                .iter_names()
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }
}

impl PortabilityConfig {
    pub fn flags(&self) -> anyhow::Result<PortabilityFlags> {
        self.rules.iter().try_fold(PortabilityFlags::empty(), |flags, rule| {
            PortabilityFlags::from_name(&rule.to_ascii_uppercase())
                .map(|flag| flags | flag)
                .with_context(|| format!("unknown portability rule {rule:?}"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributesConfig {
    pub executable: bool,
}

impl Default for AttributesConfig {
    fn default() -> Self {
        Self { executable: true }
    }
}

impl AttributesConfig {
    /// Attribute bits the working copy tracks
    pub fn mask(&self) -> u64 {
        if self.executable { ATTR_EXECUTABLE } else { 0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub rules: Vec<MergeRuleConfig>,
    pub tools: Vec<ExternalToolConfig>,
}

/// Maps a path glob to a merge tool name; first match wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRuleConfig {
    pub pattern: String,
    pub tool: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub automatic: bool,
    /// Exit code meaning "merged, but conflicts remain"
    #[serde(default)]
    pub conflict_exit_code: Option<i32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorConfig {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    pub level: String,
    /// text or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
        }
    }
}

impl WcConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: WcConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.portability.flags()?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = WcConfig::load(&dir.path().join("config.toml"))?;

        assert_eq!(config, WcConfig::default());
        assert_eq!(config.portability.flags()?, PortabilityFlags::all());
        assert_eq!(config.attributes.mask(), ATTR_EXECUTABLE);
        Ok(())
    }

    #[test]
    fn partial_sections_keep_other_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[portability]
rules = ["case"]

[[merge.rules]]
pattern = "*.lock"
tool = ":baseline"

[[merge.tools]]
name = "meld"
command = "meld"
automatic = false
"#,
        )?;

        let config = WcConfig::load(&path)?;

        assert_eq!(config.portability.flags()?, PortabilityFlags::CASE);
        assert_eq!(config.merge.rules[0].tool, ":baseline");
        assert!(!config.merge.tools[0].automatic);
        assert_eq!(config.logging, LoggingConfig::default());
        Ok(())
    }

    #[test]
    fn unknown_portability_rules_are_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[portability]\nrules = [\"VMS\"]\n")?;

        assert!(WcConfig::load(&path).is_err());
        Ok(())
    }
}
