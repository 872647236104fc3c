//! HID functions of the gadget

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::items::GadgetItem;
use super::report_desc::{KEYBOARD, MOUSE_ABSOLUTE, MOUSE_RELATIVE};

/// HID function type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidFunctionType {
    /// Keyboard with LED output report
    Keyboard,
    /// Absolute mouse (touchscreen-like positioning)
    MouseAbsolute,
    /// Relative mouse (traditional mouse movement)
    MouseRelative,
}

impl HidFunctionType {
    /// configfs instance number; also the `/dev/hidgN` minor
    pub fn instance(&self) -> u8 {
        match self {
            HidFunctionType::Keyboard => 0,
            HidFunctionType::MouseAbsolute => 1,
            HidFunctionType::MouseRelative => 2,
        }
    }

    /// Get HID protocol
    pub fn protocol(&self) -> u8 {
        match self {
            HidFunctionType::Keyboard => 1,      // Keyboard
            HidFunctionType::MouseAbsolute => 2, // Mouse
            HidFunctionType::MouseRelative => 2, // Mouse
        }
    }

    /// Get HID subclass
    pub fn subclass(&self) -> u8 {
        // Boot interface for all three; BIOS setups only talk boot protocol
        1
    }

    /// Get report length in bytes
    pub fn report_length(&self) -> u8 {
        match self {
            HidFunctionType::Keyboard => 8,
            HidFunctionType::MouseAbsolute => 6,
            HidFunctionType::MouseRelative => 4,
        }
    }

    /// Get report descriptor
    pub fn report_desc(&self) -> &'static [u8] {
        match self {
            HidFunctionType::Keyboard => KEYBOARD,
            HidFunctionType::MouseAbsolute => MOUSE_ABSOLUTE,
            HidFunctionType::MouseRelative => MOUSE_RELATIVE,
        }
    }

    /// Function name, e.g. "hid.usb0"
    pub fn device(&self) -> String {
        format!("hid.usb{}", self.instance())
    }

    /// Get expected device path (e.g., /dev/hidg0)
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/hidg{}", self.instance()))
    }

    /// Table entry for this function, linked into the configuration
    pub fn gadget_item(&self, order: u32) -> GadgetItem {
        let device = self.device();
        let attrs = BTreeMap::from([
            ("protocol".to_string(), self.protocol().to_string()),
            ("subclass".to_string(), self.subclass().to_string()),
            ("report_length".to_string(), self.report_length().to_string()),
        ]);

        GadgetItem {
            order,
            path: vec!["functions".to_string(), device.clone()],
            config_path: Some(vec![device.clone()]),
            device,
            attrs,
            config_attrs: BTreeMap::new(),
            report_desc: Some(self.report_desc().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hid_function_types() {
        assert_eq!(HidFunctionType::Keyboard.report_length(), 8);
        assert_eq!(HidFunctionType::MouseAbsolute.report_length(), 6);
        assert_eq!(HidFunctionType::MouseRelative.report_length(), 4);
        assert_eq!(HidFunctionType::MouseAbsolute.device(), "hid.usb1");
        assert_eq!(
            HidFunctionType::MouseRelative.device_path(),
            PathBuf::from("/dev/hidg2")
        );
    }

    #[test]
    fn test_gadget_item() {
        let item = HidFunctionType::Keyboard.gadget_item(1000);
        assert_eq!(item.device, "hid.usb0");
        assert_eq!(item.path, ["functions", "hid.usb0"]);
        assert!(item.is_linked());
        assert_eq!(item.attrs["protocol"], "1");
        assert_eq!(item.report_desc.as_deref(), Some(KEYBOARD));
    }
}
