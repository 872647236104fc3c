//! State probe: classify what is actually at a path

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Component, Path, PathBuf};
use tracing::{info, trace, warn};

use super::symlink;
use super::types::{FileChange, FileState};
use crate::error::{AppError, Result};

/// Kernel view of the current mount table
pub const MOUNTS_PATH: &str = "/proc/self/mounts";

/// Filesystem type reported for configfs mounts
pub const CONFIGFS_FS_TYPE: &str = "configfs";

impl FileChange {
    /// Inspect the filesystem and record `actual_state` / `actual_content`
    pub fn probe(&mut self) -> Result<()> {
        self.actual_state = None;
        self.actual_content.clear();

        let path = self.requested.path.clone();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.actual_state = Some(FileState::Absent);
                return Ok(());
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to stat: {}", e);
                return Err(e.into());
            }
        };

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            let target = resolve_link_target(&path, &target);
            self.actual_state = Some(FileState::Symlink);
            self.actual_content = OsString::from(target).into_vec();
        } else if file_type.is_dir() {
            self.actual_state = Some(self.directory_state(&path)?);
        } else if file_type.is_block_device() || file_type.is_char_device() {
            info!(path = %path.display(), "Path is a device node, leaving state unset");
        } else if file_type.is_fifo() || file_type.is_socket() {
            info!(path = %path.display(), "Path is a fifo or socket, leaving state unset");
        } else if file_type.is_file() {
            self.actual_state = Some(FileState::File);
            self.actual_content = fs::read(&path)?;
        } else {
            return Err(AppError::Internal(format!(
                "Unsupported file type at {}",
                path.display()
            )));
        }

        trace!(
            path = %path.display(),
            actual = ?self.actual_state,
            "Probed path"
        );
        Ok(())
    }

    /// Directories are refined only when the expected state asks for it
    fn directory_state(&self, path: &Path) -> Result<FileState> {
        match self.requested.expected_state {
            FileState::Mounted | FileState::MountedConfigFS => {
                let mounts = MountTable::load()?;
                Ok(match mounts.find(path) {
                    Some(entry) if entry.fs_type == CONFIGFS_FS_TYPE => FileState::MountedConfigFS,
                    Some(_) => FileState::Mounted,
                    None => FileState::Directory,
                })
            }
            FileState::SymlinkInOrderConfigFS => {
                Ok(symlink::check_order(path, &self.requested.param_symlinks)?)
            }
            _ => Ok(FileState::Directory),
        }
    }
}

/// Make a link target absolute (relative targets are relative to the
/// directory holding the link) and lexically normalised
pub fn resolve_link_target(link: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        normalize_path(target)
    } else {
        let base = link.parent().unwrap_or_else(|| Path::new("/"));
        normalize_path(&base.join(target))
    }
}

/// Lexical normalisation: drops `.` and folds `..` without touching the
/// filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

/// Parsed mount table
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read the mount table of the current process
    pub fn load() -> Result<Self> {
        Self::from_path(Path::new(MOUNTS_PATH))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Internal(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;
                Some(MountEntry {
                    source: unescape_mount_field(source),
                    mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Exact mount-point match; the last entry wins for stacked mounts
    pub fn find(&self, mount_point: &Path) -> Option<&MountEntry> {
        let wanted = normalize_path(mount_point);
        self.entries
            .iter()
            .rev()
            .find(|entry| normalize_path(&entry.mount_point) == wanted)
    }
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::changeset::types::RequestedFileChange;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(
            resolve_link_target(Path::new("/cfg/c.1/hid.usb0"), Path::new("../../functions/hid.usb0")),
            PathBuf::from("/functions/hid.usb0")
        );
    }

    #[test]
    fn test_mount_table() {
        let table = MountTable::parse(
            "sysfs /sys sysfs rw 0 0\n\
             configfs /sys/kernel/config configfs rw,relatime 0 0\n\
             /dev/sda1 /mnt/my\\040disk ext4 rw 0 0\n",
        );
        assert_eq!(table.find(Path::new("/sys")).unwrap().source, "sysfs");
        let entry = table.find(Path::new("/sys/kernel/config")).unwrap();
        assert_eq!(entry.fs_type, "configfs");
        assert!(table.find(Path::new("/sys/kernel")).is_none());
        assert!(table.find(Path::new("/mnt/my disk")).is_some());
    }

    #[test]
    fn test_probe_states() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("idVendor");
        fs::write(&file, "0x1d6b\n").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("idVendor", &link).unwrap();

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            &file,
            FileState::FileContentMatch,
        ));
        change.probe().unwrap();
        assert_eq!(change.actual_state, Some(FileState::File));
        assert_eq!(change.actual_content, b"0x1d6b\n");

        let mut change = FileChange::new(RequestedFileChange::new("test", &link, FileState::Symlink));
        change.probe().unwrap();
        assert_eq!(change.actual_state, Some(FileState::Symlink));
        assert_eq!(change.actual_content, file.to_string_lossy().as_bytes());

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path().join("missing"),
            FileState::Directory,
        ));
        change.probe().unwrap();
        assert_eq!(change.actual_state, Some(FileState::Absent));

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path(),
            FileState::Directory,
        ));
        change.probe().unwrap();
        assert_eq!(change.actual_state, Some(FileState::Directory));
    }
}
