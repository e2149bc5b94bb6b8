use crate::areas::database::ObjectStore;
use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::branch::{ANCESTOR_REGEX, PARENT_REGEX};
use crate::artifacts::objects::OBJECT_ID_LENGTH;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::error::WcError;
use anyhow::Context;

/// Minimum length of an abbreviated changeset id
pub const MIN_PREFIX_LENGTH: usize = 4;

/// Revision specification identifying a changeset
///
/// Supports:
/// - Branch names: `master`, `feature/login`
/// - Full ids: 40 hexadecimal characters
/// - Abbreviated ids: 4-40 hexadecimal characters, when no branch of that name exists
/// - Parent notation: `<revision>^`
/// - Ancestor notation: `<revision>~<n>`
///
/// Hex-looking strings are parsed as `Ref` first and only resolved as ids when no branch with
/// that name exists.
#[derive(Debug, Clone)]
pub enum Revision {
    Ref(BranchName),
    Ancestor(Box<Revision>, usize),
    Parent(Box<Revision>),
}

impl Revision {
    pub fn resolve(&self, repository: &Repository) -> anyhow::Result<ObjectId> {
        match self {
            Revision::Ref(branch_name) => {
                if let Some(oid) = repository.refs().read_head(branch_name)? {
                    return Ok(oid);
                }

                if Self::looks_like_oid(branch_name.as_ref()) {
                    Self::resolve_oid(branch_name.as_ref(), repository)
                } else {
                    Err(WcError::NotFound(format!("branch {branch_name}")).into())
                }
            }
            Revision::Parent(base_revision) => {
                Self::resolve_parent(&base_revision.resolve(repository)?, repository)
            }
            Revision::Ancestor(base_revision, generations) => {
                let mut oid = base_revision.resolve(repository)?;
                for _ in 0..*generations {
                    oid = Self::resolve_parent(&oid, repository)?;
                }

                Ok(oid)
            }
        }
    }

    fn resolve_parent(oid: &ObjectId, repository: &Repository) -> anyhow::Result<ObjectId> {
        let changeset = repository.database().fetch_changeset(oid)?;

        changeset
            .parents()
            .first()
            .cloned()
            .ok_or_else(|| WcError::NotFound(format!("parent of changeset {oid}")).into())
    }

    fn resolve_oid(oid_str: &str, repository: &Repository) -> anyhow::Result<ObjectId> {
        if oid_str.len() == OBJECT_ID_LENGTH {
            let oid = ObjectId::try_parse(oid_str.to_string())?;
            Self::validate_oid_is_changeset(&oid, repository)?;
            return Ok(oid);
        }

        let candidates = repository
            .database()
            .find_objects_by_prefix(oid_str)?
            .into_iter()
            .filter(|oid| {
                repository
                    .database()
                    .get_object_type(oid)
                    .map(|t| t == ObjectType::Changeset)
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();

        match candidates.as_slice() {
            [] => Err(WcError::NotFound(format!("revision {oid_str}")).into()),
            [oid] => Ok(oid.clone()),
            _ => {
                let mut error_msg = format!(
                    "short id {} is ambiguous\nhint: The candidates are:",
                    oid_str
                );
                for oid in &candidates {
                    error_msg.push_str(&format!("\nhint:   {} changeset", oid.to_short_oid()));
                }
                anyhow::bail!(error_msg)
            }
        }
    }

    fn validate_oid_is_changeset(oid: &ObjectId, repository: &Repository) -> anyhow::Result<()> {
        let obj_type = repository
            .database()
            .get_object_type(oid)
            .with_context(|| format!("object {} not found", oid))?;

        if obj_type != ObjectType::Changeset {
            anyhow::bail!(
                "object {} is a {}, not a changeset",
                oid.to_short_oid(),
                obj_type
            );
        }

        Ok(())
    }

    pub fn try_parse(revision: &str) -> anyhow::Result<Revision> {
        let parent_re = regex::Regex::new(PARENT_REGEX)
            .with_context(|| format!("invalid parent regex: {PARENT_REGEX}"))?;
        let ancestor_re = regex::Regex::new(ANCESTOR_REGEX)
            .with_context(|| format!("invalid ancestor regex: {ANCESTOR_REGEX}"))?;

        if let Some(caps) = parent_re.captures(revision) {
            let base_revision = Self::try_parse(&caps[1])?;

            Ok(Revision::Parent(Box::new(base_revision)))
        } else if let Some(caps) = ancestor_re.captures(revision) {
            let generations: usize = caps[2]
                .parse()
                .with_context(|| format!("failed to parse generations in revision: {revision}"))?;
            let base_revision = Self::try_parse(&caps[1])?;

            Ok(Revision::Ancestor(Box::new(base_revision), generations))
        } else {
            Ok(Revision::Ref(BranchName::try_parse(revision.to_string())?))
        }
    }

    fn looks_like_oid(s: &str) -> bool {
        s.len() >= MIN_PREFIX_LENGTH
            && s.len() <= OBJECT_ID_LENGTH
            && s.chars().all(|c| c.is_ascii_hexdigit())
    }
}
