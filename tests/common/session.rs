use crate::common::file::{FileSpec, write_file};
use assert_fs::TempDir;
use grove::areas::metadata::{CsetLabel, MetadataRead};
use grove::areas::repository::Repository;
use grove::areas::working_copy::{CONFIG_FILE, WorkingCopy};
use grove::areas::workspace::METADATA_DIR;
use grove::artifacts::objects::flat_tree::{FlatEntry, FlatTree};
use grove::artifacts::objects::object_id::ObjectId;
use grove::artifacts::status::status_record::StatusRecord;
use rstest::fixture;
use std::path::{Path, PathBuf};

pub const AUTHOR_CONFIG: &str = r#"
[author]
name = "Test Author"
email = "test.author@example.com"
"#;

/// A repository and room for any number of working copies next to it
pub struct Sandbox {
    pub dir: TempDir,
    pub repo: PathBuf,
}

#[fixture]
pub fn sandbox() -> Sandbox {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let repo = dir.path().join("repo");
    Repository::init(&repo).expect("Failed to init repository");

    Sandbox { dir, repo }
}

impl Sandbox {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Check out the default branch into `name` with an author configured
    pub fn checkout(&self, name: &str) -> WorkingCopy {
        self.checkout_with(name, None, &[], "")
    }

    pub fn checkout_with(
        &self,
        name: &str,
        revision: Option<&str>,
        sparse: &[&str],
        extra_config: &str,
    ) -> WorkingCopy {
        let sparse = sparse.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let wc = WorkingCopy::checkout(&self.repo, &self.path(name), revision, &sparse)
            .expect("Failed to check out");
        configure(wc.root(), extra_config)
    }

    pub fn repository(&self) -> Repository {
        Repository::open(&self.repo).expect("Failed to open repository")
    }

    pub fn tree(&self, changeset: &ObjectId) -> FlatTree {
        self.repository()
            .flat_tree(changeset)
            .expect("Failed to load changeset")
    }
}

/// Rewrite the working copy's configuration and reopen it
pub fn configure(root: &Path, extra_config: &str) -> WorkingCopy {
    let config = format!("{AUTHOR_CONFIG}\n{extra_config}");
    std::fs::write(root.join(METADATA_DIR).join(CONFIG_FILE), config)
        .expect("Failed to write config");
    WorkingCopy::open(root).expect("Failed to open working copy")
}

pub fn write(wc: &WorkingCopy, path: &str, content: &str) {
    write_file(&FileSpec::new(wc.root().join(path), content.to_string()));
}

pub fn read(wc: &WorkingCopy, path: &str) -> String {
    crate::common::file::read_file(&wc.root().join(path))
}

pub fn paths(paths: &[&str]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

/// Write, add and commit the given files
///
/// Adding an already controlled path is a no-op, so the same helper also commits edits.
pub fn commit_files(wc: &mut WorkingCopy, files: &[(&str, &str)], message: &str) -> ObjectId {
    for (path, content) in files {
        write(wc, path, content);
    }
    let added = files
        .iter()
        .map(|(path, _)| PathBuf::from(path))
        .collect::<Vec<_>>();
    wc.add(&added).expect("Failed to add files");
    wc.commit(None, message, None).expect("Failed to commit")
}

/// `(code, path)` of every reported item
pub fn codes(records: &[StatusRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|record| (record.code(), record.path.display().to_string().replace('\\', "/")))
        .collect()
}

pub fn status(wc: &mut WorkingCopy) -> Vec<(String, String)> {
    codes(&wc.status(&[], None).expect("Failed to read status"))
}

pub fn baseline(wc: &WorkingCopy) -> ObjectId {
    wc.metadata()
        .cset(CsetLabel::L0)
        .expect("Failed to read metadata")
        .expect("no baseline")
}

pub fn pending_merge(wc: &WorkingCopy) -> Option<ObjectId> {
    wc.metadata()
        .cset(CsetLabel::L1)
        .expect("Failed to read metadata")
}

/// Entry at a repo path of a snapshot
pub fn entry_at<'t>(tree: &'t FlatTree, path: &str) -> Option<&'t FlatEntry> {
    tree.entries()
        .find(|entry| tree.path_of(&entry.gid).is_some_and(|p| p == Path::new(path)))
}
