//! Tree object
//!
//! A tree is the immutable listing of one directory. Unlike a plain snapshot format, every entry
//! carries the gid of the item it names, so identity survives renames and moves between
//! snapshots.
//!
//! ## Format
//!
//! On disk: `tree <size>\0<entries>`
//! Each entry: `<type-char> <attrbits-octal> <gid> <name>\0<20-byte-sha1>`, sorted by name.

use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object::{Object, Packable, Unpackable, envelope};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

/// Kind of a versioned item; fixed for the lifetime of its gid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemType {
    File,
    Directory,
    Symlink,
}

impl ItemType {
    pub fn as_char(&self) -> char {
        match self {
            ItemType::File => 'f',
            ItemType::Directory => 'd',
            ItemType::Symlink => 'l',
        }
    }

    pub fn try_from_char(value: char) -> anyhow::Result<Self> {
        match value {
            'f' => Ok(ItemType::File),
            'd' => Ok(ItemType::Directory),
            'l' => Ok(ItemType::Symlink),
            other => anyhow::bail!("invalid item type '{other}'"),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            ItemType::File => 1,
            ItemType::Directory => 2,
            ItemType::Symlink => 3,
        }
    }

    pub fn try_from_i64(value: i64) -> anyhow::Result<Self> {
        match value {
            1 => Ok(ItemType::File),
            2 => Ok(ItemType::Directory),
            3 => Ok(ItemType::Symlink),
            other => anyhow::bail!("invalid item type code {other}"),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ItemType::Directory)
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemType::File => write!(f, "file"),
            ItemType::Directory => write!(f, "directory"),
            ItemType::Symlink => write!(f, "symlink"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct TreeEntry {
    pub gid: Gid,
    pub name: String,
    pub item_type: ItemType,
    pub attrbits: u64,
    pub oid: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Add an entry, rejecting a second entry with the same name
    pub fn insert(&mut self, entry: TreeEntry) -> anyhow::Result<()> {
        if entry.name.is_empty() || entry.name.contains(['/', '\0']) {
            anyhow::bail!("invalid tree entry name {:?}", entry.name);
        }
        if self.entries.contains_key(&entry.name) {
            anyhow::bail!("duplicate tree entry name {:?}", entry.name);
        }

        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Packable for Tree {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut content = Vec::new();

        for entry in self.entries.values() {
            let header = format!(
                "{} {:o} {} {}\0",
                entry.item_type.as_char(),
                entry.attrbits,
                entry.gid,
                entry.name
            );
            content.write_all(header.as_bytes())?;
            entry.oid.write_h40_to(&mut content)?;
        }

        envelope(self.object_type(), &content)
    }
}

impl Unpackable for Tree {
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut tree = Tree::default();

        loop {
            let mut header = Vec::new();
            if reader.read_until(b'\0', &mut header)? == 0 {
                break;
            }
            header.pop();

            let header = String::from_utf8(header).context("tree entry header is not utf-8")?;
            let mut fields = header.splitn(4, ' ');
            let (Some(kind), Some(attrbits), Some(gid), Some(name)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                anyhow::bail!("malformed tree entry header {header:?}");
            };

            let item_type = ItemType::try_from_char(
                kind.chars()
                    .next()
                    .context("tree entry without item type")?,
            )?;
            let attrbits = u64::from_str_radix(attrbits, 8)
                .with_context(|| format!("invalid attribute bits {attrbits:?}"))?;
            let gid = Gid::try_parse(gid.to_string())?;
            let oid = ObjectId::read_h40_from(&mut reader)?;

            tree.insert(TreeEntry::new(gid, name.to_string(), item_type, attrbits, oid))?;
        }

        Ok(tree)
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }
}
