use crate::artifacts::branch::INVALID_BRANCH_NAME_REGEX;
use anyhow::Context;

const REF_PREFIX: &str = "refs/heads/";

/// How strictly a branch name is checked before it is attached to a working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchPolicy {
    /// Reject names matching the invalid-name pattern
    Validate,
    /// Accept any non-empty name; working copies created before validation existed may carry
    /// names the pattern would now reject
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BranchName(String);

impl BranchName {
    pub fn try_parse(name: String) -> anyhow::Result<Self> {
        Self::parse_with_policy(&name, BranchPolicy::Validate)
    }

    /// Normalize and, depending on the policy, validate a branch name
    ///
    /// Normalization trims surrounding whitespace and strips a leading `refs/heads/`.
    pub fn parse_with_policy(name: &str, policy: BranchPolicy) -> anyhow::Result<Self> {
        let name = Self::normalize(name);
        if name.is_empty() {
            anyhow::bail!("branch name cannot be empty");
        }

        if policy == BranchPolicy::Validate {
            let re = regex::Regex::new(INVALID_BRANCH_NAME_REGEX).with_context(|| {
                format!("invalid branch name regex: {INVALID_BRANCH_NAME_REGEX}")
            })?;

            if re.is_match(&name) {
                anyhow::bail!("invalid branch name: {}", name);
            }
        }

        Ok(Self(name))
    }

    fn normalize(name: &str) -> String {
        let name = name.trim();
        name.strip_prefix(REF_PREFIX).unwrap_or(name).to_string()
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("master", "master")]
    #[case("  feature/login ", "feature/login")]
    #[case("refs/heads/release-1.0", "release-1.0")]
    fn names_are_normalized(#[case] raw: &str, #[case] expected: &str) {
        let name = BranchName::try_parse(raw.to_string()).unwrap();

        assert_eq!(name.as_ref(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case(".hidden")]
    #[case("has space")]
    #[case("a..b")]
    #[case("ends.lock")]
    #[case("tilde~1")]
    fn invalid_names_are_rejected_when_validating(#[case] raw: &str) {
        assert!(BranchName::try_parse(raw.to_string()).is_err());
    }

    #[test]
    fn legacy_policy_accepts_names_validation_rejects() {
        let name = BranchName::parse_with_policy("refs/heads/old:name", BranchPolicy::Legacy);

        assert_eq!(name.unwrap().as_ref(), "old:name");
        assert!(BranchName::parse_with_policy("  ", BranchPolicy::Legacy).is_err());
    }
}
