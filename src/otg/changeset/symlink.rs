//! Ordered symlink sets.
//!
//! configfs numbers USB interfaces by the order in which function links
//! were created under a configuration, and `readdir` on configfs returns
//! entries in that same creation order. The set of links is therefore only
//! correct if the order is too, and the only way to change the order is to
//! remove every link and create them again.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, trace};

use super::probe::{normalize_path, resolve_link_target};
use super::types::{FileState, Symlink};
use crate::otg::configfs::{create_dir, create_symlink, remove_file};

/// Symlinks directly inside `dir`, in directory enumeration order, with
/// absolute targets
pub fn read_ordered_symlinks(dir: &Path) -> io::Result<Vec<Symlink>> {
    let mut links = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_symlink() {
            continue;
        }
        let path = entry.path();
        let target = fs::read_link(&path)?;
        links.push(Symlink {
            target: resolve_link_target(&path, &target),
            path: normalize_path(&path),
        });
    }
    Ok(links)
}

/// Compare what is on disk against the declared order
pub fn check_order(dir: &Path, expected: &[Symlink]) -> io::Result<FileState> {
    let actual = read_ordered_symlinks(dir)?;
    let expected: Vec<Symlink> = expected.iter().map(normalized).collect();

    if actual == expected {
        Ok(FileState::SymlinkInOrderConfigFS)
    } else {
        trace!(
            dir = %dir.display(),
            actual = ?actual,
            expected = ?expected,
            "Symlinks not in order"
        );
        Ok(FileState::SymlinkNotInOrderConfigFS)
    }
}

/// Remove every symlink in `dir`, then create `expected` in order
pub fn recreate_symlinks(dir: &Path, expected: &[Symlink]) -> io::Result<()> {
    relink(dir, expected, |link| create_symlink(&link.target, &link.path))
}

/// Clear `dir` of symlinks, then hand each of `expected` to `create` in
/// declaration order
fn relink<F>(dir: &Path, expected: &[Symlink], mut create: F) -> io::Result<()>
where
    F: FnMut(&Symlink) -> io::Result<()>,
{
    if !dir.exists() {
        create_dir(dir)?;
    }

    for link in read_ordered_symlinks(dir)? {
        debug!("Removing symlink {}", link);
        remove_file(&link.path)?;
    }

    for link in expected {
        debug!("Creating symlink {}", link);
        create(link)?;
    }

    Ok(())
}

fn normalized(link: &Symlink) -> Symlink {
    Symlink {
        target: resolve_link_target(&link.path, &link.target),
        path: normalize_path(&link.path),
    }
}
