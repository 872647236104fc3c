//! Executing a resolved action against the filesystem

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::symlink::recreate_symlinks;
use super::types::{Action, FileChange};
use crate::error::{AppError, Result};
use crate::otg::configfs::{
    create_dir, create_symlink, mount_configfs, remove_file, remove_path, touch, write_bytes,
    write_file,
};

impl FileChange {
    /// Carry out `action` for this change
    pub fn apply(&self, action: Action) -> Result<()> {
        self.execute(action).map_err(|source| AppError::ChangeFailed {
            key: self.key(),
            path: self.path().to_path_buf(),
            source,
        })
    }

    fn execute(&self, action: Action) -> io::Result<()> {
        let path = self.path();
        let content = self.requested.expected_content.as_slice();

        match action {
            Action::DoNothing => Ok(()),
            Action::Remove => remove_path(path),
            Action::CreateFile | Action::UpdateFile => write_bytes(path, content),
            Action::WriteFile => write_file(path, content),
            Action::Touch => touch(path),
            Action::CreateSymlink => create_symlink(link_target(content), path),
            Action::RecreateSymlink => {
                remove_file(path)?;
                create_symlink(link_target(content), path)
            }
            Action::CreateDirectory => create_dir(path),
            Action::ReorderSymlinks => recreate_symlinks(path, &self.requested.param_symlinks),
            Action::MountConfigFS => mount_configfs(path),
        }
    }
}

fn link_target(content: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(content))
}
