//! USB Device Controller discovery and bind/unbind

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

use super::configfs::{read_file, write_file};
use crate::error::{AppError, Result};

/// Platform directory whose `*.usb` children are controllers
pub const DEFAULT_UDC_DISCOVERY_PATH: &str = "/sys/devices/platform/usbdrd";

/// Controller driver directory holding `bind` and `unbind`
pub const DEFAULT_UDC_DRIVER_PATH: &str = "/sys/bus/platform/drivers/dwc3";

/// UDC class directory, one entry per registered controller
pub const DEFAULT_UDC_CLASS_PATH: &str = "/sys/class/udc";

const UDC_SUFFIX: &str = ".usb";

/// State reported when the controller has no state file
pub const STATE_NOT_ATTACHED: &str = "not attached";

/// State reported when the state file can't be read
pub const STATE_UNKNOWN: &str = "unknown";

/// Controllers found under `dir`, sorted by name
pub fn find_udcs(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot scan {} for UDCs: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut udcs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(UDC_SUFFIX))
        .collect();
    udcs.sort();
    udcs
}

/// Whether the driver currently has `udc` bound
pub fn is_udc_bound(driver_path: &Path, udc: &str) -> Result<bool> {
    match fs::symlink_metadata(driver_path.join(udc)) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AppError::Internal(format!(
            "Failed to check UDC {} binding: {}",
            udc, e
        ))),
    }
}

/// Attach `udc` to its driver
pub fn bind_udc(driver_path: &Path, udc: &str) -> Result<()> {
    info!("Binding UDC {}", udc);
    write_file(&driver_path.join("bind"), udc.as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to bind UDC {}: {}", udc, e)))
}

/// Detach `udc` from its driver
pub fn unbind_udc(driver_path: &Path, udc: &str) -> Result<()> {
    info!("Unbinding UDC {}", udc);
    write_file(&driver_path.join("unbind"), udc.as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to unbind UDC {}: {}", udc, e)))
}

/// Connection state of `udc` as reported by the kernel, e.g. "configured"
pub fn usb_state(class_path: &Path, udc: &str) -> String {
    match read_file(&class_path.join(udc).join("state")) {
        Ok(state) => state,
        Err(e) if e.kind() == io::ErrorKind::NotFound => STATE_NOT_ATTACHED.to_string(),
        Err(e) => {
            debug!("Failed to read state of UDC {}: {}", udc, e);
            STATE_UNKNOWN.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_udcs() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("fcc00000.usb")).unwrap();
        fs::create_dir(dir.path().join("a0000000.usb")).unwrap();
        fs::create_dir(dir.path().join("power")).unwrap();
        fs::write(dir.path().join("b0000000.usb"), "").unwrap();

        assert_eq!(find_udcs(dir.path()), ["a0000000.usb", "fcc00000.usb"]);
        assert!(find_udcs(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_bind_state() {
        let dir = tempdir().unwrap();
        let udc = "fcc00000.usb";
        assert!(!is_udc_bound(dir.path(), udc).unwrap());

        // bind/unbind never create their control files
        assert!(bind_udc(dir.path(), udc).is_err());
        fs::write(dir.path().join("bind"), "").unwrap();
        bind_udc(dir.path(), udc).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("bind")).unwrap(), udc);

        fs::create_dir(dir.path().join(udc)).unwrap();
        assert!(is_udc_bound(dir.path(), udc).unwrap());
    }

    #[test]
    fn test_usb_state() {
        let dir = tempdir().unwrap();
        let udc = "fcc00000.usb";
        assert_eq!(usb_state(dir.path(), udc), STATE_NOT_ATTACHED);

        fs::create_dir(dir.path().join(udc)).unwrap();
        fs::write(dir.path().join(udc).join("state"), "configured\n").unwrap();
        assert_eq!(usb_state(dir.path(), udc), "configured");
    }
}
