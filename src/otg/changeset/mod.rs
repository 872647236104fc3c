//! Declarative filesystem reconciliation
//!
//! A [`ChangeSet`] collects [`RequestedFileChange`]s describing how paths
//! should look. Applying it probes what is there, works out the action
//! each change needs, orders everything by dependency and runs the
//! actions. Applying the same set twice leaves nothing to do the second
//! time.
//!
//! ```text
//! ChangeSet ──> ChangeSetResolver ──> FileChange::resolve_action ──> probe
//!                   │ graph + order          ActionCache
//!                   └──> FileChange::apply
//! ```

pub mod apply;
pub mod content;
pub mod probe;
pub mod resolver;
pub mod symlink;
pub mod types;

use std::path::PathBuf;

pub use content::compare_file_content;
pub use probe::{MountEntry, MountTable};
pub use resolver::{ActionCache, ChangeSetResolver, PlannedChange};
pub use types::{Action, FileChange, FileState, RequestedFileChange, Symlink, When};

use crate::error::Result;

/// Ordered collection of requested changes
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<RequestedFileChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_change(&mut self, change: RequestedFileChange) {
        self.changes.push(change);
    }

    /// Shorthand for the common unkeyed change
    pub fn add_file_change(
        &mut self,
        component: &str,
        path: impl Into<PathBuf>,
        expected_state: FileState,
        expected_content: impl Into<Vec<u8>>,
        depends_on: &[String],
        description: &str,
    ) {
        self.add_change(
            RequestedFileChange::new(component, path, expected_state)
                .with_content(expected_content)
                .depends_on(depends_on.iter().cloned())
                .with_description(description),
        );
    }

    pub fn changes(&self) -> &[RequestedFileChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn resolver(&self) -> Result<ChangeSetResolver> {
        let mut resolver =
            ChangeSetResolver::new(self.changes.iter().cloned().map(FileChange::new).collect())?;
        resolver.resolve()?;
        Ok(resolver)
    }

    /// Resolve without applying
    pub fn plan(&self) -> Result<Vec<PlannedChange>> {
        Ok(self.resolver()?.plan())
    }

    /// Resolve and apply every change
    pub fn apply(&self) -> Result<()> {
        self.resolver()?.apply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_reorder_scenario() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("configs/c.1");
        let functions = dir.path().join("functions");
        fs::create_dir_all(&config).unwrap();
        let links: Vec<Symlink> = ["a", "b", "c"]
            .iter()
            .map(|n| {
                fs::create_dir_all(functions.join(n)).unwrap();
                Symlink::new(config.join(n), functions.join(n))
            })
            .collect();
        std::os::unix::fs::symlink(&links[0].target, &links[0].path).unwrap();
        std::os::unix::fs::symlink(&links[2].target, &links[2].path).unwrap();

        let mut set = ChangeSet::new();
        set.add_change(
            RequestedFileChange::new("gadget", &config, FileState::SymlinkInOrderConfigFS)
                .with_key("reorder-symlinks")
                .with_symlinks(links.clone()),
        );

        let plan = set.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, Action::ReorderSymlinks);

        set.apply().unwrap();
        let on_disk = symlink::read_ordered_symlinks(&config).unwrap();
        assert_eq!(on_disk.len(), 3);
        for link in &links {
            assert!(on_disk.contains(link));
        }
    }

    #[test]
    fn test_add_file_change() {
        let dir = tempdir().unwrap();
        let mut set = ChangeSet::new();
        let base = dir.path().join("gadget");
        let base_key = base.to_string_lossy().into_owned();
        set.add_file_change("gadget", &base, FileState::Directory, Vec::new(), &[], "create gadget");
        set.add_file_change(
            "gadget",
            base.join("idVendor"),
            FileState::FileContentMatch,
            "0x1d6b",
            &[base_key],
            "write vendor id",
        );
        assert_eq!(set.len(), 2);

        set.apply().unwrap();
        assert!(set.plan().unwrap().iter().all(|p| p.action == Action::DoNothing));
    }
}
