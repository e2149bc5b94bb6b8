//! Content-addressed object store
//!
//! The working-copy engine only needs six operations from the object store, captured by the
//! [`ObjectStore`] trait. [`Database`] implements it with zlib-compressed loose objects under
//! `<repo>/objects/xx/yyyy...`, written through a temp file and renamed into place so readers
//! never observe a partial object.

use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::changeset::Changeset;
use crate::artifacts::objects::object::{Object, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tree::Tree;
use crate::error::WcError;
use anyhow::Context;
use bytes::Bytes;
use fake::rand;
use std::io::{BufRead, Cursor, Read, Write};
use std::path::{Path, PathBuf};

pub trait ObjectStore {
    fn fetch_blob(&self, oid: &ObjectId) -> anyhow::Result<Bytes>;

    fn store_blob(&self, content: Bytes) -> anyhow::Result<ObjectId>;

    fn fetch_tree(&self, oid: &ObjectId) -> anyhow::Result<Tree>;

    fn store_tree(&self, tree: &Tree) -> anyhow::Result<ObjectId>;

    fn fetch_changeset(&self, oid: &ObjectId) -> anyhow::Result<Changeset>;

    fn store_changeset(&self, changeset: &Changeset) -> anyhow::Result<ObjectId>;
}

#[derive(Debug)]
pub struct Database {
    path: Box<Path>,
}

impl Database {
    pub fn new(path: Box<Path>) -> Self {
        Database { path }
    }

    pub fn objects_path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, object_id: &ObjectId) -> bool {
        self.path.join(object_id.to_path()).exists()
    }

    pub fn store(&self, object: &impl Object) -> anyhow::Result<ObjectId> {
        let object_id = object.object_id()?;
        let object_path = self.path.join(object_id.to_path());

        // write the object to disk unless it already exists
        if !object_path.exists() {
            std::fs::create_dir_all(
                object_path
                    .parent()
                    .context(format!("Invalid object path {}", object_path.display()))?,
            )
            .context(format!(
                "Unable to create object directory {}",
                object_path.display()
            ))?;

            self.write_object(object_path, object.serialize()?)?;
        }

        Ok(object_id)
    }

    pub fn get_object_type(&self, object_id: &ObjectId) -> anyhow::Result<ObjectType> {
        let (object_type, _) = self.parse_object_as_bytes(object_id)?;
        Ok(object_type)
    }

    fn parse_object_as<T: Unpackable>(
        &self,
        object_id: &ObjectId,
        expected: ObjectType,
    ) -> anyhow::Result<T> {
        let (object_type, object_reader) = self.parse_object_as_bytes(object_id)?;
        if object_type != expected {
            anyhow::bail!("object {object_id} is a {object_type}, not a {expected}");
        }

        T::deserialize(object_reader)
            .with_context(|| format!("Unable to parse {expected} object {object_id}"))
    }

    fn parse_object_as_bytes(
        &self,
        object_id: &ObjectId,
    ) -> anyhow::Result<(ObjectType, impl BufRead)> {
        let object_path = self.path.join(object_id.to_path());
        let object_content = self.read_object(object_path)?;
        let total = object_content.len();
        let mut object_reader = Cursor::new(object_content);

        let (object_type, size) = ObjectType::read_envelope(&mut object_reader)
            .with_context(|| format!("object {object_id} is corrupt"))?;
        let remaining = total.saturating_sub(object_reader.position() as usize);
        if size != remaining {
            return Err(WcError::Integrity {
                path: object_id.to_path(),
                expected: format!("{size} bytes"),
                actual: format!("{remaining} bytes"),
            }
            .into());
        }

        Ok((object_type, object_reader))
    }

    fn read_object(&self, object_path: PathBuf) -> anyhow::Result<Bytes> {
        let object_content = std::fs::read(&object_path).context(format!(
            "Unable to read object file {}",
            object_path.display()
        ))?;

        Self::decompress(object_content.into())
    }

    fn write_object(&self, object_path: PathBuf, object_content: Bytes) -> anyhow::Result<()> {
        let object_dir = object_path
            .parent()
            .context(format!("Invalid object path {}", object_path.display()))?;
        let temp_object_path = object_dir.join(Self::generate_temp_name());

        let object_content = Self::compress(object_content)?;

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_object_path)
            .context(format!(
                "Unable to open object file {}",
                temp_object_path.display()
            ))?;

        file.write_all(&object_content).context(format!(
            "Unable to write object file {}",
            temp_object_path.display()
        ))?;

        // rename the temp file to the object file to make it atomic
        std::fs::rename(&temp_object_path, &object_path).context(format!(
            "Unable to rename object file to {}",
            object_path.display()
        ))?;

        Ok(())
    }

    fn compress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&data)
            .context("Unable to compress object content")?;

        encoder
            .finish()
            .map(|compressed_content| compressed_content.into())
            .context("Unable to finish compressing object content")
    }

    fn decompress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut decoder = flate2::read::ZlibDecoder::new(&*data);
        let mut decompressed_content = Vec::new();
        decoder
            .read_to_end(&mut decompressed_content)
            .context("Unable to decompress object content")?;

        Ok(decompressed_content.into())
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{}", rand::random::<u32>())
    }

    /// Find all objects whose id starts with the given prefix
    ///
    /// # Arguments
    ///
    /// * `prefix` - A hexadecimal string prefix of at least two characters
    ///
    /// # Returns
    ///
    /// All matching ids; more than one means the prefix is ambiguous.
    pub fn find_objects_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ObjectId>> {
        let mut matches = Vec::new();
        if prefix.len() < 2 {
            anyhow::bail!("object id prefix {prefix:?} is too short");
        }

        let prefix = prefix.to_ascii_lowercase();
        let (dir_name, file_prefix) = prefix.split_at(2);
        let dir_path = self.path.join(dir_name);

        if dir_path.is_dir() {
            for entry in std::fs::read_dir(&dir_path)? {
                let file_name = entry?.file_name();
                let file_name = file_name.to_string_lossy();

                if file_name.starts_with(file_prefix)
                    && let Ok(oid) = ObjectId::try_parse(format!("{dir_name}{file_name}"))
                {
                    matches.push(oid);
                }
            }
        }

        matches.sort();
        Ok(matches)
    }
}

impl ObjectStore for Database {
    fn fetch_blob(&self, oid: &ObjectId) -> anyhow::Result<Bytes> {
        let blob: Blob = self.parse_object_as(oid, ObjectType::Blob)?;
        Ok(blob.into_content())
    }

    fn store_blob(&self, content: Bytes) -> anyhow::Result<ObjectId> {
        self.store(&Blob::new(content))
    }

    fn fetch_tree(&self, oid: &ObjectId) -> anyhow::Result<Tree> {
        self.parse_object_as(oid, ObjectType::Tree)
    }

    fn store_tree(&self, tree: &Tree) -> anyhow::Result<ObjectId> {
        self.store(tree)
    }

    fn fetch_changeset(&self, oid: &ObjectId) -> anyhow::Result<Changeset> {
        self.parse_object_as(oid, ObjectType::Changeset)
    }

    fn store_changeset(&self, changeset: &Changeset) -> anyhow::Result<ObjectId> {
        self.store(changeset)
    }
}
