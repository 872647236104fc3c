//! MSD (Mass Storage Device) function of the gadget
//!
//! Only the function and its LUN attributes are declared here. Which image
//! backs the LUN is decided elsewhere; the gadget merely keeps the LUN
//! ejected (`file` = "\n") and reports its path through `get_path`.

use std::collections::BTreeMap;

use super::items::GadgetItem;

/// Function name in configfs
pub const MSD_FUNCTION: &str = "mass_storage.usb0";

/// The single LUN exposed
pub const MSD_LUN: &str = "lun.0";

/// MSD LUN configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsdLunConfig {
    /// Mount as CD-ROM
    pub cdrom: bool,
    /// Read-only mode
    pub ro: bool,
    /// Removable media
    pub removable: bool,
    /// SCSI INQUIRY vendor/product string
    pub inquiry_string: String,
}

impl Default for MsdLunConfig {
    fn default() -> Self {
        Self {
            cdrom: true,
            ro: true,
            removable: true,
            inquiry_string: "One-KVM Virtual Media".to_string(),
        }
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

impl MsdLunConfig {
    fn attrs(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("cdrom".to_string(), flag(self.cdrom)),
            ("ro".to_string(), flag(self.ro)),
            ("removable".to_string(), flag(self.removable)),
            ("file".to_string(), "\n".to_string()),
            ("inquiry_string".to_string(), self.inquiry_string.clone()),
        ])
    }
}

/// Table entry for the mass-storage function, linked into the configuration
pub fn base_item(order: u32) -> GadgetItem {
    GadgetItem {
        order,
        device: MSD_FUNCTION.to_string(),
        path: vec!["functions".to_string(), MSD_FUNCTION.to_string()],
        config_path: Some(vec![MSD_FUNCTION.to_string()]),
        attrs: BTreeMap::from([("stall".to_string(), "1".to_string())]),
        config_attrs: BTreeMap::new(),
        report_desc: None,
    }
}

/// Table entry for the LUN inside the mass-storage function
pub fn lun_item(order: u32, config: &MsdLunConfig) -> GadgetItem {
    GadgetItem {
        order,
        device: MSD_FUNCTION.to_string(),
        path: vec![
            "functions".to_string(),
            MSD_FUNCTION.to_string(),
            MSD_LUN.to_string(),
        ],
        config_path: None,
        attrs: config.attrs(),
        config_attrs: BTreeMap::new(),
        report_desc: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lun_defaults_to_ejected_cdrom() {
        let item = lun_item(3001, &MsdLunConfig::default());
        assert_eq!(item.attrs["file"], "\n");
        assert_eq!(item.attrs["cdrom"], "1");
        assert!(!item.is_linked());
    }

    #[test]
    fn test_base_is_linked() {
        let item = base_item(3000);
        assert!(item.is_linked());
        assert_eq!(item.config_path.as_deref(), Some(&[MSD_FUNCTION.to_string()][..]));
    }
}
