//! Change model: desired assertions about filesystem paths

use std::fmt;
use std::path::{Path, PathBuf};

/// State of a path, either expected (what a change asserts) or actual
/// (what the probe observed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    Absent,
    Directory,
    File,
    /// Regular file whose content must match `expected_content`
    FileContentMatch,
    /// Unconditional write to an existing control file, never probed
    FileWrite,
    Mounted,
    MountedConfigFS,
    Symlink,
    /// Directory whose symlinks exist in exactly the declared creation order
    SymlinkInOrderConfigFS,
    SymlinkNotInOrderConfigFS,
    /// Create or bump mtime, never probed
    Touch,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Absent => "absent",
            FileState::Directory => "directory",
            FileState::File => "file",
            FileState::FileContentMatch => "file_content_match",
            FileState::FileWrite => "file_write",
            FileState::Mounted => "mounted",
            FileState::MountedConfigFS => "mounted_configfs",
            FileState::Symlink => "symlink",
            FileState::SymlinkInOrderConfigFS => "symlink_in_order_configfs",
            FileState::SymlinkNotInOrderConfigFS => "symlink_not_in_order_configfs",
            FileState::Touch => "touch",
        };
        f.write_str(name)
    }
}

/// When a change takes part in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum When {
    #[default]
    Always,
    /// Inert unless another change names it in `before_change` and that
    /// change turns out to do real work
    BeforeChange,
}

/// One entry of an ordered symlink set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symlink {
    /// Location of the link itself
    pub path: PathBuf,
    /// What the link points at
    pub target: PathBuf,
}

impl Symlink {
    pub fn new(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for Symlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.path.display(), self.target.display())
    }
}

/// Desired assertion about a single path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedFileChange {
    /// Free-text grouping used in logs
    pub component: String,
    /// Unique identity within a batch; empty means "use the path"
    pub key: String,
    pub path: PathBuf,
    pub expected_state: FileState,
    pub expected_content: Vec<u8>,
    /// Only used by `SymlinkInOrderConfigFS`
    pub param_symlinks: Vec<Symlink>,
    /// Keys that must be applied before this change
    pub depends_on: Vec<String>,
    /// Conditional changes promoted into the batch, ahead of this one, if
    /// this change resolves to anything but `DoNothing`
    pub before_change: Vec<String>,
    pub when: When,
    pub ignore_errors: bool,
    pub description: String,
}

impl RequestedFileChange {
    pub fn new(component: &str, path: impl Into<PathBuf>, expected_state: FileState) -> Self {
        Self {
            component: component.to_string(),
            key: String::new(),
            path: path.into(),
            expected_state,
            expected_content: Vec::new(),
            param_symlinks: Vec::new(),
            depends_on: Vec::new(),
            before_change: Vec::new(),
            when: When::Always,
            ignore_errors: false,
            description: String::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.expected_content = content.into();
        self
    }

    pub fn with_symlinks(mut self, symlinks: Vec<Symlink>) -> Self {
        self.param_symlinks = symlinks;
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn before_change<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before_change.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn when(mut self, when: When) -> Self {
        self.when = when;
        self
    }

    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Identity of this change within a batch
    pub fn key(&self) -> String {
        if self.key.is_empty() {
            path_key(&self.path)
        } else {
            self.key.clone()
        }
    }

    /// Whether two changes assert the same thing about the same path.
    ///
    /// Ordering metadata (dependencies, description, component) is not part
    /// of the assertion.
    pub fn is_same(&self, other: &RequestedFileChange) -> bool {
        self.key() == other.key()
            && self.path == other.path
            && self.expected_state == other.expected_state
            && self.expected_content == other.expected_content
            && self.param_symlinks == other.param_symlinks
            && self.when == other.when
            && self.ignore_errors == other.ignore_errors
    }
}

impl fmt::Display for RequestedFileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({})",
            self.component,
            self.path.display(),
            self.expected_state
        )?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}

/// Key used for a change that has no explicit key
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A requested change plus what was observed on disk while resolving it
#[derive(Debug, Clone)]
pub struct FileChange {
    pub requested: RequestedFileChange,
    /// `None` until probed, and for paths the probe does not classify
    /// (device nodes)
    pub actual_state: Option<FileState>,
    pub actual_content: Vec<u8>,
    /// Dependencies discovered during resolution
    pub resolved_deps: Vec<String>,
}

impl FileChange {
    pub fn new(requested: RequestedFileChange) -> Self {
        Self {
            requested,
            actual_state: None,
            actual_content: Vec::new(),
            resolved_deps: Vec::new(),
        }
    }

    pub fn key(&self) -> String {
        self.requested.key()
    }

    pub fn path(&self) -> &Path {
        &self.requested.path
    }

    /// All keys that must be applied before this change
    pub fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.requested.depends_on.iter().chain(self.resolved_deps.iter())
    }
}

/// Concrete operation chosen for a change after comparing desired and
/// actual state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    DoNothing,
    Remove,
    CreateFile,
    WriteFile,
    UpdateFile,
    Touch,
    CreateSymlink,
    RecreateSymlink,
    CreateDirectory,
    ReorderSymlinks,
    MountConfigFS,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::DoNothing => "do_nothing",
            Action::Remove => "remove",
            Action::CreateFile => "create_file",
            Action::WriteFile => "write_file",
            Action::UpdateFile => "update_file",
            Action::Touch => "touch",
            Action::CreateSymlink => "create_symlink",
            Action::RecreateSymlink => "recreate_symlink",
            Action::CreateDirectory => "create_directory",
            Action::ReorderSymlinks => "reorder_symlinks",
            Action::MountConfigFS => "mount_configfs",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_defaults_to_path() {
        let change = RequestedFileChange::new("gadget", "/tmp/a", FileState::Directory);
        assert_eq!(change.key(), "/tmp/a");

        let keyed = change.with_key("custom");
        assert_eq!(keyed.key(), "custom");
    }

    #[test]
    fn test_is_same_ignores_ordering_metadata() {
        let a = RequestedFileChange::new("gadget", "/tmp/a", FileState::Directory)
            .depends_on(["x"])
            .with_description("first");
        let b = RequestedFileChange::new("other", "/tmp/a", FileState::Directory)
            .depends_on(["y", "z"]);
        assert!(a.is_same(&b));

        let c = RequestedFileChange::new("gadget", "/tmp/a", FileState::Absent);
        assert!(!a.is_same(&c));
    }

    #[test]
    fn test_symlink_order_matters() {
        let a = RequestedFileChange::new("gadget", "/c", FileState::SymlinkInOrderConfigFS)
            .with_symlinks(vec![Symlink::new("/c/a", "/f/a"), Symlink::new("/c/b", "/f/b")]);
        let b = RequestedFileChange::new("gadget", "/c", FileState::SymlinkInOrderConfigFS)
            .with_symlinks(vec![Symlink::new("/c/b", "/f/b"), Symlink::new("/c/a", "/f/a")]);
        assert!(!a.is_same(&b));
    }
}
