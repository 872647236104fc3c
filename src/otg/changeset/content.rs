//! Action resolution: desired vs actual state for one change

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::probe::resolve_link_target;
use super::types::{Action, FileChange, FileState};
use crate::error::{AppError, Result};

/// Mass-storage attribute compared with surrounding whitespace ignored
const LOOSE_MATCH_FILE: &str = "inquiry_string";

/// Mass-storage LUN backing file attribute; empty and "\n" both mean
/// "no medium"
const LUN_FILE: &str = "file";

impl FileChange {
    /// Probe (when the expected state needs it) and pick the action that
    /// moves the path to its expected state
    pub fn resolve_action(&mut self) -> Result<Action> {
        let expected = self.requested.expected_state;
        match expected {
            FileState::FileWrite => return Ok(Action::WriteFile),
            FileState::Touch => return Ok(Action::Touch),
            _ => {}
        }

        self.probe()?;
        let actual = self.actual_state;

        let action = match expected {
            FileState::Directory => match actual {
                Some(FileState::Directory) => Action::DoNothing,
                _ => Action::CreateDirectory,
            },
            FileState::File => match actual {
                Some(FileState::File) => Action::DoNothing,
                _ => Action::CreateFile,
            },
            FileState::FileContentMatch => match actual {
                Some(FileState::File) if self.content_matches() => Action::DoNothing,
                Some(FileState::File) => Action::UpdateFile,
                _ => Action::CreateFile,
            },
            FileState::Symlink => match actual {
                Some(FileState::Symlink) if self.symlink_target_matches() => Action::DoNothing,
                Some(FileState::Symlink) => Action::RecreateSymlink,
                _ => Action::CreateSymlink,
            },
            FileState::SymlinkInOrderConfigFS => match actual {
                Some(FileState::SymlinkInOrderConfigFS) => Action::DoNothing,
                _ => Action::ReorderSymlinks,
            },
            FileState::Absent => match actual {
                Some(FileState::Absent) => Action::DoNothing,
                _ => Action::Remove,
            },
            FileState::MountedConfigFS => match actual {
                Some(FileState::MountedConfigFS) => Action::DoNothing,
                _ => Action::MountConfigFS,
            },
            FileState::Mounted => match actual {
                Some(FileState::Mounted | FileState::MountedConfigFS) => Action::DoNothing,
                _ => return Err(self.unknown_action()),
            },
            FileState::SymlinkNotInOrderConfigFS | FileState::FileWrite | FileState::Touch => {
                return Err(self.unknown_action())
            }
        };

        Ok(action)
    }

    fn unknown_action(&self) -> AppError {
        AppError::UnknownAction {
            key: self.key(),
            expected: self.requested.expected_state.to_string(),
            actual: self
                .actual_state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    fn content_matches(&self) -> bool {
        let name = file_name(&self.requested.path);
        let expected = &self.requested.expected_content;

        if name == Some(LUN_FILE) && self.actual_content.is_empty() && expected.as_slice() == b"\n"
        {
            return true;
        }

        compare_file_content(
            &self.actual_content,
            expected,
            name == Some(LOOSE_MATCH_FILE),
        )
    }

    fn symlink_target_matches(&self) -> bool {
        let expected = Path::new(OsStr::from_bytes(&self.requested.expected_content));
        let expected = resolve_link_target(&self.requested.path, expected);
        expected.as_os_str().as_bytes() == self.actual_content.as_slice()
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Whether configfs content read back from disk is equivalent to what was
/// written.
///
/// The kernel appends a newline to most attributes and reports 16-bit
/// descriptor fields (`bcdDevice` and friends) in its own radix, so a plain
/// byte comparison would report drift that isn't there.
pub fn compare_file_content(actual: &[u8], expected: &[u8], looser_match: bool) -> bool {
    if actual == expected {
        return true;
    }

    if actual.len() == expected.len() + 1
        && actual.starts_with(expected)
        && actual[expected.len()] == b'\n'
    {
        return true;
    }

    if expected.len() == 4 && (actual.len() == 6 || actual.len() == 7) {
        let actual = if actual.len() == 7 && actual[6] == b'\n' {
            &actual[..6]
        } else {
            actual
        };
        let reported = std::str::from_utf8(actual).ok().and_then(parse_prefixed_i16);
        let written = std::str::from_utf8(expected)
            .ok()
            .and_then(|s| i64::from_str_radix(s, 16).ok())
            .and_then(|v| i16::try_from(v).ok());
        if let (Some(reported), Some(written)) = (reported, written) {
            if reported == written {
                return true;
            }
        }
    }

    if looser_match {
        let actual = String::from_utf8_lossy(actual);
        let expected = String::from_utf8_lossy(expected);
        if actual.trim() == expected.trim() {
            return true;
        }
    }

    false
}

/// Parse a signed 16-bit integer whose radix is given by its prefix:
/// `0x` hex, `0o` or a bare leading `0` octal, `0b` binary, else decimal
fn parse_prefixed_i16(s: &str) -> Option<i16> {
    let (negative, digits) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..])
    } else {
        (10, lower.as_str())
    };

    if !underscores_ok(&lower, radix) {
        return None;
    }
    let body: String = body.chars().filter(|c| *c != '_').collect();
    if body.is_empty() || body.starts_with(['+', '-']) {
        return None;
    }

    let magnitude = i64::from_str_radix(&body, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i16::try_from(value).ok()
}

/// Underscores may only follow a digit or a base prefix, and must be
/// followed by a digit
fn underscores_ok(digits: &str, radix: u32) -> bool {
    let bytes = digits.as_bytes();
    let prefixed = bytes.len() >= 2 && bytes[0] == b'0' && matches!(bytes[1], b'x' | b'o' | b'b');
    let (start, mut saw) = if prefixed { (2, b'0') } else { (0, b'^') };

    for &c in &bytes[start..] {
        if c.is_ascii_digit() || (radix == 16 && c.is_ascii_hexdigit()) {
            saw = b'0';
        } else if c == b'_' {
            if saw != b'0' {
                return false;
            }
            saw = b'_';
        } else {
            if saw == b'_' {
                return false;
            }
            saw = b'!';
        }
    }
    saw != b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::changeset::types::RequestedFileChange;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_trailing_newline_tolerated() {
        assert!(compare_file_content(b"One-KVM\n", b"One-KVM", false));
        assert!(!compare_file_content(b"One-KVM\n\n", b"One-KVM", false));
        assert!(!compare_file_content(b"One-KVN\n", b"One-KVM", false));
    }

    #[test]
    fn test_kernel_radix_equivalence() {
        // bcdDevice written as bare hex, read back with a 0x prefix
        assert!(compare_file_content(b"0x0104\n", b"0104", false));
        assert!(compare_file_content(b"0x0100", b"0100", false));
        // the same value reported in octal
        assert!(compare_file_content(b"000404", b"0104", false));
        assert!(compare_file_content(b"000404\n", b"0104", false));

        assert!(!compare_file_content(b"0x0105\n", b"0104", false));
        assert!(!compare_file_content(b"0x01045", b"0104", false));
        assert!(!compare_file_content(b"0x104", b"0104", false));
    }

    #[test]
    fn test_prefixed_parse() {
        assert_eq!(parse_prefixed_i16("0x1d6b"), Some(0x1d6b));
        assert_eq!(parse_prefixed_i16("000404"), Some(0o404));
        assert_eq!(parse_prefixed_i16("260"), Some(260));
        assert_eq!(parse_prefixed_i16("0"), Some(0));
        assert_eq!(parse_prefixed_i16("0xffff"), None);
        assert_eq!(parse_prefixed_i16("0x"), None);
    }

    #[test]
    fn test_prefixed_parse_underscores() {
        assert_eq!(parse_prefixed_i16("0x_1d6b"), Some(0x1d6b));
        assert_eq!(parse_prefixed_i16("0x1d_6b"), Some(0x1d6b));
        assert_eq!(parse_prefixed_i16("1_000"), Some(1000));
        assert_eq!(parse_prefixed_i16("0_404"), Some(0o404));

        assert_eq!(parse_prefixed_i16("_100"), None);
        assert_eq!(parse_prefixed_i16("100_"), None);
        assert_eq!(parse_prefixed_i16("1__0"), None);
        assert_eq!(parse_prefixed_i16("0x1d6b_"), None);
        assert!(compare_file_content(b"0x_104", b"0104", false));
        assert!(!compare_file_content(b"_0x104", b"0104", false));
    }

    #[test]
    fn test_looser_match() {
        assert!(!compare_file_content(b"One-KVM Virtual Media  \n", b"One-KVM Virtual Media", false));
        assert!(compare_file_content(b"One-KVM Virtual Media  \n", b"One-KVM Virtual Media", true));
    }

    #[test]
    fn test_content_match_actions() {
        let dir = tempdir().unwrap();
        let manufacturer = dir.path().join("manufacturer");
        fs::write(&manufacturer, "One-KVM\n").unwrap();

        let mut change = FileChange::new(
            RequestedFileChange::new("test", &manufacturer, FileState::FileContentMatch)
                .with_content("One-KVM"),
        );
        assert_eq!(change.resolve_action().unwrap(), Action::DoNothing);

        let mut change = FileChange::new(
            RequestedFileChange::new("test", &manufacturer, FileState::FileContentMatch)
                .with_content("Other"),
        );
        assert_eq!(change.resolve_action().unwrap(), Action::UpdateFile);

        let mut change = FileChange::new(
            RequestedFileChange::new("test", dir.path().join("product"), FileState::FileContentMatch)
                .with_content("Other"),
        );
        assert_eq!(change.resolve_action().unwrap(), Action::CreateFile);
    }

    #[test]
    fn test_lun_file_empty_means_ejected() {
        let dir = tempdir().unwrap();
        let lun_file = dir.path().join("file");
        fs::write(&lun_file, "").unwrap();

        let mut change = FileChange::new(
            RequestedFileChange::new("test", &lun_file, FileState::FileContentMatch)
                .with_content("\n"),
        );
        assert_eq!(change.resolve_action().unwrap(), Action::DoNothing);

        // only the LUN file gets this treatment
        let other = dir.path().join("ro");
        fs::write(&other, "").unwrap();
        let mut change = FileChange::new(
            RequestedFileChange::new("test", &other, FileState::FileContentMatch)
                .with_content("\n"),
        );
        assert_eq!(change.resolve_action().unwrap(), Action::UpdateFile);
    }

    #[test]
    fn test_symlink_actions() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("hid.usb0");
        let other = dir.path().join("hid.usb1");
        fs::create_dir(&target).unwrap();
        fs::create_dir(&other).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let wanted = |t: &Path| {
            FileChange::new(
                RequestedFileChange::new("test", &link, FileState::Symlink)
                    .with_content(t.as_os_str().as_bytes()),
            )
        };
        assert_eq!(wanted(&target).resolve_action().unwrap(), Action::DoNothing);
        assert_eq!(wanted(&other).resolve_action().unwrap(), Action::RecreateSymlink);

        fs::remove_file(&link).unwrap();
        assert_eq!(wanted(&target).resolve_action().unwrap(), Action::CreateSymlink);
    }

    #[test]
    fn test_unprobed_states() {
        let mut change = FileChange::new(RequestedFileChange::new(
            "udc",
            "/nonexistent/bind",
            FileState::FileWrite,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::WriteFile);
        assert!(change.actual_state.is_none());

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            "/nonexistent/stamp",
            FileState::Touch,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::Touch);
    }

    #[test]
    fn test_mount_states() {
        // a fresh tempdir is never a mount point
        let dir = tempdir().unwrap();
        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path(),
            FileState::MountedConfigFS,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::MountConfigFS);
        assert_eq!(change.actual_state, Some(FileState::Directory));

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path().join("config"),
            FileState::MountedConfigFS,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::MountConfigFS);

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path(),
            FileState::Mounted,
        ));
        assert!(matches!(
            change.resolve_action(),
            Err(AppError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_absent_and_directory() {
        let dir = tempdir().unwrap();
        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path().join("gone"),
            FileState::Absent,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::DoNothing);

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path(),
            FileState::Absent,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::Remove);

        let mut change = FileChange::new(RequestedFileChange::new(
            "test",
            dir.path().join("functions"),
            FileState::Directory,
        ));
        assert_eq!(change.resolve_action().unwrap(), Action::CreateDirectory);
    }
}
