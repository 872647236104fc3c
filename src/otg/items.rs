//! Gadget item table
//!
//! Each item is one directory of the gadget (or the gadget root itself)
//! with the attribute files it must contain. Items carrying a
//! `config_path` but no `config_attrs` are functions: they get a symlink in
//! `configs/c.1`, and the order of those symlinks decides interface
//! numbering on the host.

use std::collections::BTreeMap;

use super::hid::HidFunctionType;
use super::msd::{self, MsdLunConfig};
use crate::config::{Devices, GadgetConfig};

/// One entry of the gadget item table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetItem {
    /// Position in the table; also the symlink creation order
    pub order: u32,
    /// Function name (e.g. "hid.usb0"); empty for gadget-level items
    pub device: String,
    /// Location relative to the gadget root
    pub path: Vec<String>,
    /// Location relative to `configs/c.1`
    pub config_path: Option<Vec<String>>,
    pub attrs: BTreeMap<String, String>,
    /// Attributes written under `config_path` instead of a symlink
    pub config_attrs: BTreeMap<String, String>,
    pub report_desc: Option<Vec<u8>>,
}

impl GadgetItem {
    /// Whether the item is a function linked into the configuration
    pub fn is_linked(&self) -> bool {
        self.config_path.is_some() && self.config_attrs.is_empty()
    }

    /// Key of the conditional change that unlinks this function
    pub fn disable_key(&self) -> String {
        format!("disable-{}", self.device)
    }
}

/// Ordered, immutable set of gadget items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetItems {
    items: BTreeMap<String, GadgetItem>,
}

impl GadgetItems {
    pub fn new(items: BTreeMap<String, GadgetItem>) -> Self {
        Self { items }
    }

    pub fn get(&self, key: &str) -> Option<&GadgetItem> {
        self.items.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut GadgetItem> {
        self.items.get_mut(key)
    }

    /// Items by ascending `order`, key as tie-breaker
    pub fn ordered(&self) -> Vec<(&str, &GadgetItem)> {
        let mut items: Vec<_> = self.items.iter().map(|(k, v)| (k.as_str(), v)).collect();
        items.sort_by(|a, b| a.1.order.cmp(&b.1.order).then(a.0.cmp(b.0)));
        items
    }

    /// Apply descriptor overrides from the user configuration
    pub fn with_gadget_config(mut self, config: &GadgetConfig) -> Self {
        if let Some(base) = self.items.get_mut(BASE) {
            base.attrs
                .insert("idVendor".to_string(), format!("0x{:04x}", config.vendor_id));
            base.attrs
                .insert("idProduct".to_string(), format!("0x{:04x}", config.product_id));
        }
        if let Some(info) = self.items.get_mut(BASE_INFO) {
            info.attrs
                .insert("serialnumber".to_string(), config.serial_number.clone());
            info.attrs
                .insert("manufacturer".to_string(), config.manufacturer.clone());
            info.attrs.insert("product".to_string(), config.product.clone());
        }
        self
    }
}

impl Default for GadgetItems {
    fn default() -> Self {
        default_gadget_items()
    }
}

pub const BASE: &str = "base";
pub const BASE_INFO: &str = "base_info";
pub const KEYBOARD: &str = "keyboard";
pub const ABSOLUTE_MOUSE: &str = "absolute_mouse";
pub const RELATIVE_MOUSE: &str = "relative_mouse";
pub const MASS_STORAGE_BASE: &str = "mass_storage_base";
pub const MASS_STORAGE_LUN0: &str = "mass_storage_lun0";

fn attrs<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The composite keyboard + mice + mass-storage gadget
pub fn default_gadget_items() -> GadgetItems {
    let defaults = GadgetConfig::default();

    let base = GadgetItem {
        order: 0,
        device: String::new(),
        path: Vec::new(),
        config_path: Some(Vec::new()),
        attrs: attrs([
            ("bcdUSB", "0x0200"), // USB 2.0
            ("idVendor", ""),
            ("idProduct", ""),
            ("bcdDevice", "0100"),
        ]),
        config_attrs: attrs([("MaxPower", "250")]), // in units of 2mA
        report_desc: None,
    };

    let base_info = GadgetItem {
        order: 1,
        device: String::new(),
        path: vec!["strings".to_string(), "0x409".to_string()],
        config_path: Some(vec!["strings".to_string(), "0x409".to_string()]),
        attrs: attrs([("serialnumber", ""), ("manufacturer", ""), ("product", "")]),
        config_attrs: attrs([("configuration", "Config 1: HID")]),
        report_desc: None,
    };

    let items = BTreeMap::from([
        (BASE.to_string(), base),
        (BASE_INFO.to_string(), base_info),
        (KEYBOARD.to_string(), HidFunctionType::Keyboard.gadget_item(1000)),
        (ABSOLUTE_MOUSE.to_string(), HidFunctionType::MouseAbsolute.gadget_item(1001)),
        (RELATIVE_MOUSE.to_string(), HidFunctionType::MouseRelative.gadget_item(1002)),
        (MASS_STORAGE_BASE.to_string(), msd::base_item(3000)),
        (
            MASS_STORAGE_LUN0.to_string(),
            msd::lun_item(3001, &MsdLunConfig::default()),
        ),
    ]);

    GadgetItems::new(items).with_gadget_config(&defaults)
}

/// Whether the item with `key` belongs in the gadget for `devices`.
/// Keys this function doesn't know are always enabled.
pub fn is_item_enabled(key: &str, devices: &Devices) -> bool {
    match key {
        KEYBOARD => devices.keyboard,
        ABSOLUTE_MOUSE => devices.absolute_mouse,
        RELATIVE_MOUSE => devices.relative_mouse,
        MASS_STORAGE_BASE | MASS_STORAGE_LUN0 => devices.mass_storage,
        _ => true,
    }
}
