//! Changeset object
//!
//! A changeset is one immutable snapshot of the whole versioned tree. It contains:
//! - the id of a super-root tree, holding a single directory entry `@` for the root item
//! - parent changeset ids (none for the initial changeset, two after a merge)
//! - author and committer information
//! - the message
//!
//! ## Format
//!
//! ```text
//! changeset <size>\0
//! tree <super-root-sha>
//! parent <parent-sha>
//! author <name> <email> <timestamp> <timezone>
//! committer <name> <email> <timestamp> <timezone>
//!
//! <message>
//! ```

use crate::artifacts::objects::object::{Object, Packable, Unpackable, envelope};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::config::AuthorConfig;
use anyhow::Context;
use bytes::Bytes;
use std::io::BufRead;

pub const AUTHOR_NAME_ENV: &str = "GROVE_AUTHOR_NAME";
pub const AUTHOR_EMAIL_ENV: &str = "GROVE_AUTHOR_EMAIL";
pub const AUTHOR_DATE_ENV: &str = "GROVE_AUTHOR_DATE";

/// Author or committer information
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Author {
    name: String,
    email: String,
    timestamp: chrono::DateTime<chrono::FixedOffset>,
}

impl Author {
    /// Create a new author with the current timestamp
    pub fn new(name: String, email: String) -> Self {
        Author {
            name,
            email,
            timestamp: chrono::Local::now().fixed_offset(),
        }
    }

    pub fn new_with_timestamp(
        name: String,
        email: String,
        timestamp: chrono::DateTime<chrono::FixedOffset>,
    ) -> Self {
        Author {
            name,
            email,
            timestamp,
        }
    }

    /// Resolve the author from the environment, falling back to configuration
    ///
    /// Reads `GROVE_AUTHOR_NAME`, `GROVE_AUTHOR_EMAIL` and optionally `GROVE_AUTHOR_DATE`
    /// (RFC 2822 or `%Y-%m-%d %H:%M:%S %z`). Missing name or email fall back to the `[author]`
    /// section of the configuration.
    pub fn load(defaults: &AuthorConfig) -> anyhow::Result<Self> {
        let name = std::env::var(AUTHOR_NAME_ENV)
            .ok()
            .or_else(|| defaults.name.clone())
            .with_context(|| format!("{AUTHOR_NAME_ENV} not set and no [author] name configured"))?;
        let email = std::env::var(AUTHOR_EMAIL_ENV)
            .ok()
            .or_else(|| defaults.email.clone())
            .with_context(|| {
                format!("{AUTHOR_EMAIL_ENV} not set and no [author] email configured")
            })?;
        let timestamp = std::env::var(AUTHOR_DATE_ENV).ok().and_then(|date_str| {
            chrono::DateTime::parse_from_rfc2822(&date_str)
                .or_else(|_| chrono::DateTime::parse_from_str(&date_str, "%Y-%m-%d %H:%M:%S %z"))
                .ok()
        });

        match timestamp {
            Some(ts) => Ok(Author::new_with_timestamp(name, email, ts)),
            None => Ok(Author::new(name, email)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn display(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp.timestamp(),
            self.timestamp.format("%z")
        )
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::FixedOffset> {
        self.timestamp
    }
}

impl TryFrom<&str> for Author {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // "name <email> timestamp timezone", split from the right
        let parts: Vec<&str> = value.rsplitn(3, ' ').collect();
        if parts.len() < 3 {
            return Err(anyhow::anyhow!("Invalid author format"));
        }

        let timezone = parts[0];
        let timestamp = parts[1]
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("Invalid timestamp"))?;
        let name_email_part = parts[2];

        let email_start = name_email_part
            .find('<')
            .ok_or_else(|| anyhow::anyhow!("Invalid author format: missing '<'"))?;
        let email_end = name_email_part
            .find('>')
            .ok_or_else(|| anyhow::anyhow!("Invalid author format: missing '>'"))?;

        let name = name_email_part[..email_start].trim().to_string();
        let email = name_email_part[email_start + 1..email_end].to_string();

        let offset = chrono::DateTime::parse_from_str(
            &format!("1970-01-01 00:00:00 {timezone}"),
            "%Y-%m-%d %H:%M:%S %z",
        )
        .map_err(|_| anyhow::anyhow!("Invalid timezone"))?
        .offset()
        .to_owned();
        let datetime = chrono::DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?
            .with_timezone(&offset);

        Ok(Author {
            name,
            email,
            timestamp: datetime,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Changeset {
    parents: Vec<ObjectId>,
    root_oid: ObjectId,
    author: Author,
    committer: Author,
    message: String,
}

impl Changeset {
    pub fn new(parents: Vec<ObjectId>, root_oid: ObjectId, author: Author, message: String) -> Self {
        Changeset {
            parents,
            root_oid,
            author: author.clone(),
            committer: author,
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Id of the super-root tree
    pub fn root_oid(&self) -> &ObjectId {
        &self.root_oid
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::FixedOffset> {
        self.committer.timestamp()
    }
}

impl Packable for Changeset {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut lines = vec![format!("tree {}", self.root_oid)];
        for parent in &self.parents {
            lines.push(format!("parent {parent}"));
        }
        lines.push(format!("author {}", self.author.display()));
        lines.push(format!("committer {}", self.committer.display()));
        lines.push(String::new());
        lines.push(self.message.to_string());

        envelope(self.object_type(), lines.join("\n").as_bytes())
    }
}

impl Unpackable for Changeset {
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        let mut lines = content.split('\n');

        let root_oid = lines
            .next()
            .and_then(|line| line.strip_prefix("tree "))
            .context("Invalid changeset object: missing tree line")?;
        let root_oid = ObjectId::try_parse(root_oid.to_string())?;

        let mut parents = Vec::new();
        let mut next_line = lines
            .next()
            .context("Invalid changeset object: missing author line")?;
        while let Some(parent) = next_line.strip_prefix("parent ") {
            parents.push(ObjectId::try_parse(parent.to_string())?);
            next_line = lines
                .next()
                .context("Invalid changeset object: missing author line")?;
        }

        let author = next_line
            .strip_prefix("author ")
            .context("Invalid changeset object: invalid author line")?;
        let author = Author::try_from(author)?;

        let committer = lines
            .next()
            .and_then(|line| line.strip_prefix("committer "))
            .context("Invalid changeset object: missing committer line")?;
        let committer = Author::try_from(committer)?;

        // skip the empty line
        lines.next();
        let message = lines.collect::<Vec<&str>>().join("\n");

        Ok(Changeset {
            parents,
            root_oid,
            author,
            committer,
            message,
        })
    }
}

impl Object for Changeset {
    fn object_type(&self) -> ObjectType {
        ObjectType::Changeset
    }
}
