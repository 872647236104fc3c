use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::otg::configfs::{
    CONFIGFS_MOUNT_PATH, CONFIG_DIR, DEFAULT_GADGET_NAME, DEFAULT_USB_PRODUCT_ID,
    DEFAULT_USB_VENDOR_ID, USB_GADGET_DIR,
};
use crate::otg::udc::{DEFAULT_UDC_CLASS_PATH, DEFAULT_UDC_DISCOVERY_PATH, DEFAULT_UDC_DRIVER_PATH};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// USB descriptor and behaviour settings
    pub gadget: GadgetConfig,
    /// Which gadget functions are exposed
    pub devices: Devices,
    /// Where configfs and the UDC live
    pub layout: GadgetLayout,
}

/// OTG USB device descriptor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetConfig {
    /// USB Vendor ID (e.g., 0x1d6b)
    pub vendor_id: u16,
    /// USB Product ID (e.g., 0x0104)
    pub product_id: u16,
    /// Serial number (empty leaves the attribute blank)
    pub serial_number: String,
    /// Manufacturer string
    pub manufacturer: String,
    /// Product string
    pub product: String,
    /// Return internal problems to the caller instead of logging them
    pub strict_mode: bool,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_USB_VENDOR_ID,
            product_id: DEFAULT_USB_PRODUCT_ID,
            serial_number: String::new(),
            manufacturer: "One-KVM".to_string(),
            product: "One-KVM USB Emulation Device".to_string(),
            strict_mode: false,
        }
    }
}

/// Enabled gadget functions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Devices {
    pub keyboard: bool,
    pub absolute_mouse: bool,
    pub relative_mouse: bool,
    pub mass_storage: bool,
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            keyboard: true,
            absolute_mouse: true,
            relative_mouse: true,
            mass_storage: true,
        }
    }
}

/// Filesystem locations the gadget is assembled in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetLayout {
    /// configfs mount point
    pub configfs_path: PathBuf,
    /// Gadget directory name under `usb_gadget`
    pub gadget_name: String,
    /// Platform directory whose `*.usb` children are controllers
    pub udc_discovery_path: PathBuf,
    /// Controller driver directory holding `bind` / `unbind`
    pub udc_driver_path: PathBuf,
    /// `/sys/class/udc`, for the controller state
    pub udc_class_path: PathBuf,
    /// Mount configfs at `configfs_path` when it isn't mounted yet
    pub mount_configfs: bool,
}

impl Default for GadgetLayout {
    fn default() -> Self {
        Self {
            configfs_path: PathBuf::from(CONFIGFS_MOUNT_PATH),
            gadget_name: DEFAULT_GADGET_NAME.to_string(),
            udc_discovery_path: PathBuf::from(DEFAULT_UDC_DISCOVERY_PATH),
            udc_driver_path: PathBuf::from(DEFAULT_UDC_DRIVER_PATH),
            udc_class_path: PathBuf::from(DEFAULT_UDC_CLASS_PATH),
            mount_configfs: true,
        }
    }
}

impl GadgetLayout {
    /// Gadget root, e.g. /sys/kernel/config/usb_gadget/one-kvm
    pub fn gadget_path(&self) -> PathBuf {
        self.configfs_path
            .join(USB_GADGET_DIR)
            .join(&self.gadget_name)
    }

    /// Active configuration, e.g. .../one-kvm/configs/c.1
    pub fn config_path(&self) -> PathBuf {
        self.gadget_path().join(CONFIG_DIR)
    }
}
