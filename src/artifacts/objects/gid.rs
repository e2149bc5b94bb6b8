//! Globally unique item identifiers
//!
//! A gid names one versioned item for its whole life, across renames, moves and merges. It is a
//! 33-character string: the letter `g` followed by 32 lowercase hex digits. Locally the working
//! copy maps every gid to a small integer alias (see the metadata store).

use fake::rand;
use serde::{Deserialize, Serialize};

pub const GID_LENGTH: usize = 33;
const GID_PREFIX: char = 'g';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Gid(String);

impl Gid {
    pub fn generate() -> Self {
        Self(format!("{GID_PREFIX}{:032x}", rand::random::<u128>()))
    }

    pub fn try_parse(gid: String) -> anyhow::Result<Self> {
        let valid = gid.len() == GID_LENGTH
            && gid.starts_with(GID_PREFIX)
            && gid[1..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());

        if valid {
            Ok(Self(gid))
        } else {
            anyhow::bail!("invalid gid: {gid}")
        }
    }

    /// Eight hex digits after the prefix, used to disambiguate colliding names
    pub fn short(&self) -> &str {
        &self.0[1..9]
    }
}

impl TryFrom<String> for Gid {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_parse(value)
    }
}

impl From<Gid> for String {
    fn from(value: Gid) -> Self {
        value.0
    }
}

impl AsRef<str> for Gid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn generated_gids_parse_back() {
        let gid = Gid::generate();

        assert!(Gid::try_parse(gid.to_string()).is_ok());
        assert_eq!(gid.short().len(), 8);
        assert_ne!(gid, Gid::generate());
    }

    #[rstest]
    #[case("g1234")]
    #[case("x0123456789abcdef0123456789abcdef")]
    #[case("g0123456789ABCDEF0123456789ABCDEF")]
    fn malformed_gids_are_rejected(#[case] raw: &str) {
        assert!(Gid::try_parse(raw.to_string()).is_err());
    }
}
