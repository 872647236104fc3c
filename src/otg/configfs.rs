//! ConfigFS file operations for USB Gadget

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// ConfigFS mount point
pub const CONFIGFS_MOUNT_PATH: &str = "/sys/kernel/config";

/// Directory holding gadgets, relative to the configfs mount point
pub const USB_GADGET_DIR: &str = "usb_gadget";

/// Default gadget name
pub const DEFAULT_GADGET_NAME: &str = "one-kvm";

/// The single USB configuration every gadget uses, relative to its root
pub const CONFIG_DIR: &str = "configs/c.1";

/// USB Vendor ID (Linux Foundation) - default value
pub const DEFAULT_USB_VENDOR_ID: u16 = 0x1d6b;

/// USB Product ID (Multifunction Composite Gadget) - default value
pub const DEFAULT_USB_PRODUCT_ID: u16 = 0x0104;

/// Check if ConfigFS is available
pub fn is_configfs_available(mount_path: &Path) -> bool {
    mount_path.join(USB_GADGET_DIR).exists()
}

/// Write to an existing sysfs/configfs control file.
///
/// IMPORTANT: sysfs attributes require a single atomic write() syscall and
/// may be write-only, so the file is opened O_WRONLY without O_CREAT or
/// O_TRUNC and the whole buffer goes out in one call.
pub fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(data)?;
    // Explicitly flush to ensure sysfs processes the write
    file.flush()
}

/// Create or replace a file with binary content
pub fn write_bytes(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.flush()
}

/// Create the file if missing and bump its modification time
pub fn touch(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.set_modified(std::time::SystemTime::now())
}

/// Read string content from a file
pub fn read_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Create directory (and parents) if not exists
pub fn create_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Remove whatever is at `path`; a missing path is not an error.
///
/// configfs directories are removed with rmdir, never recursively: the
/// kernel refuses to drop a directory that still has children.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove file or symlink
pub fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Create symlink at `dest` pointing to `src`
pub fn create_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

/// Mount configfs at `path`, creating the mount point first
pub fn mount_configfs(path: &Path) -> io::Result<()> {
    use nix::mount::{mount, MsFlags};

    create_dir(path)?;
    mount(
        Some("configfs"),
        path,
        Some("configfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(io::Error::from)
}
