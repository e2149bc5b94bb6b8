use crate::artifacts::portability::{
    MAX_ENTRYNAME_BYTES, PortabilityFlags, WIN_INVALID_CHARS, WIN_RESERVED_NAMES,
};
use crate::error::WcError;
use std::collections::HashMap;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Why two names clash inside one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collision {
    /// Byte-identical names
    Exact(String),
    /// Distinct names that fold to the same key under `rule`
    Folded { other: String, rule: &'static str },
}

/// Accumulates the entrynames of one directory and reports clashes
///
/// Create a fresh collider for every directory listing under validation; names are compared
/// only against names previously added to the same collider.
#[derive(Debug, Clone)]
pub struct PortabilityCollider {
    flags: PortabilityFlags,
    names: HashMap<String, String>,
}

impl PortabilityCollider {
    pub fn new(flags: PortabilityFlags) -> Self {
        Self {
            flags,
            names: HashMap::new(),
        }
    }

    /// Check that a name is representable on every target filesystem
    pub fn check_name(&self, name: &str) -> anyhow::Result<()> {
        let invalid = |reason: &str| -> anyhow::Result<()> {
            Err(WcError::InvalidEntryname {
                name: name.to_string(),
                reason: reason.to_string(),
            }
            .into())
        };

        if name.is_empty() || name == "." || name == ".." {
            return invalid("reserved path component");
        }
        if name.contains(['/', '\0']) {
            return invalid("contains a path separator or NUL");
        }
        if self.flags.contains(PortabilityFlags::MAX_LENGTH) && name.len() > MAX_ENTRYNAME_BYTES {
            return invalid("longer than 255 bytes");
        }
        if self.flags.contains(PortabilityFlags::TRAILING_DOT_SPACE) && name.ends_with(['.', ' '])
        {
            return invalid("ends with a dot or space");
        }
        if self.flags.contains(PortabilityFlags::WIN_INVALID_CHARS)
            && name
                .chars()
                .any(|c| WIN_INVALID_CHARS.contains(&c) || c.is_control())
        {
            return invalid("contains a character Windows cannot store");
        }
        if self.flags.contains(PortabilityFlags::WIN_RESERVED) {
            let stem = name.split('.').next().unwrap_or(name).trim_end();
            if WIN_RESERVED_NAMES.contains(stem.to_ascii_uppercase().as_str()) {
                return invalid("reserved device name on Windows");
            }
        }

        Ok(())
    }

    fn fold(&self, name: &str) -> String {
        let mut key = name.to_string();
        if self.flags.contains(PortabilityFlags::NORMALIZATION) {
            key = key.nfc().collect();
        }
        if self.flags.contains(PortabilityFlags::CASE) {
            key = key.to_lowercase();
        }
        if self.flags.contains(PortabilityFlags::TRAILING_DOT_SPACE) {
            key = key.trim_end_matches(['.', ' ']).to_string();
        }
        key
    }

    fn blame(&self, name: &str, other: &str) -> &'static str {
        let nfc = |s: &str| s.nfc().collect::<String>();
        if self.flags.contains(PortabilityFlags::NORMALIZATION) && nfc(name) == nfc(other) {
            "NORMALIZATION"
        } else if self.flags.contains(PortabilityFlags::CASE)
            && nfc(name).to_lowercase() == nfc(other).to_lowercase()
        {
            "CASE"
        } else {
            "TRAILING_DOT_SPACE"
        }
    }

    /// Record a name, reporting the first clash with a name already recorded
    ///
    /// A clashing name is not recorded.
    pub fn add(&mut self, name: &str) -> Option<Collision> {
        let key = self.fold(name);

        match self.names.get(&key) {
            Some(existing) if existing == name => Some(Collision::Exact(name.to_string())),
            Some(existing) => Some(Collision::Folded {
                other: existing.clone(),
                rule: self.blame(name, existing),
            }),
            None => {
                self.names.insert(key, name.to_string());
                None
            }
        }
    }

    /// Validate and record a name that is about to appear in `dir`
    ///
    /// Exact duplicates surface as `AlreadyExists`, folded clashes as `PortabilityCollision`.
    pub fn add_checked(&mut self, dir: &Path, name: &str) -> anyhow::Result<()> {
        self.check_name(name)?;

        match self.add(name) {
            None => Ok(()),
            Some(Collision::Exact(existing)) => Err(WcError::AlreadyExists {
                path: dir.join(name),
                blocker: existing,
            }
            .into()),
            Some(Collision::Folded { other, rule }) => Err(WcError::PortabilityCollision {
                dir: dir.to_path_buf(),
                name: name.to_string(),
                other,
                rule: rule.to_string(),
            }
            .into()),
        }
    }
}
