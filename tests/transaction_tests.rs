//! Full gadget reconciliation against a temporary directory standing in
//! for configfs and sysfs

use std::fs;
use std::path::Path;

use otg_gadget::config::{Devices, GadgetConfig, GadgetLayout};
use otg_gadget::otg::{default_gadget_items, Action, GadgetTransaction, UsbGadget};
use otg_gadget::AppError;
use tempfile::tempdir;

const UDC: &str = "ff580000.usb";

fn test_layout(root: &Path) -> GadgetLayout {
    fs::create_dir_all(root.join("platform").join(UDC)).unwrap();
    fs::create_dir_all(root.join("driver")).unwrap();
    GadgetLayout {
        configfs_path: root.join("config"),
        gadget_name: "kvm".to_string(),
        udc_discovery_path: root.join("platform"),
        udc_driver_path: root.join("driver"),
        udc_class_path: root.join("class"),
        mount_configfs: false,
    }
}

fn keyboard_only() -> Devices {
    Devices {
        keyboard: true,
        absolute_mouse: false,
        relative_mouse: false,
        mass_storage: false,
    }
}

#[test]
fn test_transaction_converges() {
    let dir = tempdir().unwrap();
    let layout = test_layout(dir.path());
    let items = default_gadget_items();

    let mut tx = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    tx.create_config_path();
    tx.write_gadget_config();
    let first = tx.plan().unwrap();
    assert!(first.iter().any(|p| p.action == Action::CreateDirectory));
    assert_eq!(first.last().map(|p| p.key.as_str()), Some("udc"));
    tx.commit().unwrap();

    let gadget = layout.gadget_path();
    assert_eq!(fs::read_to_string(gadget.join("idVendor")).unwrap(), "0x1d6b");
    assert_eq!(fs::read_to_string(gadget.join("bcdDevice")).unwrap(), "0100");
    assert_eq!(
        fs::read_to_string(layout.config_path().join("strings/0x409/configuration")).unwrap(),
        "Config 1: HID"
    );

    let mut again = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    again.create_config_path();
    again.write_gadget_config();
    let second = again.plan().unwrap();
    assert!(second.iter().all(|p| p.action == Action::DoNothing), "{:?}", second);
}

#[test]
fn test_kernel_formatted_values_match() {
    let dir = tempdir().unwrap();
    let layout = test_layout(dir.path());
    let items = default_gadget_items();

    let mut tx = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    tx.create_config_path();
    tx.write_gadget_config();
    tx.commit().unwrap();

    // configfs reads ids back in its own format, with a newline
    let gadget = layout.gadget_path();
    fs::write(gadget.join("idProduct"), "0x0104\n").unwrap();
    fs::write(gadget.join("bcdDevice"), "0x0100\n").unwrap();
    fs::write(gadget.join("UDC"), format!("{}\n", UDC)).unwrap();
    fs::write(gadget.join("strings/0x409/manufacturer"), "One-KVM\n").unwrap();

    let mut again = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    again.create_config_path();
    again.write_gadget_config();
    let plan = again.plan().unwrap();
    assert!(plan.iter().all(|p| p.action == Action::DoNothing), "{:?}", plan);
}

#[test]
fn test_changed_attribute_unlinks_function_first() {
    let dir = tempdir().unwrap();
    let gadget = UsbGadget::new(
        "kvm",
        default_gadget_items(),
        keyboard_only(),
        GadgetConfig::default(),
        test_layout(dir.path()),
    );
    gadget.init().unwrap();

    assert!(gadget
        .override_gadget_config("keyboard", "report_length", "16")
        .unwrap());
    let plan = gadget.plan_gadget_config().unwrap();

    let position = |key: &str| plan.iter().position(|p| p.key == key).unwrap();
    let link = gadget.get_config_path("keyboard").unwrap();
    let attr = gadget.get_path("keyboard").unwrap().join("report_length");
    let disable = position("disable-hid.usb0");
    let write = position(&attr.to_string_lossy());
    assert_eq!(plan[disable].action, Action::Remove);
    assert_eq!(plan[write].action, Action::UpdateFile);
    assert!(disable < write);

    gadget.update_gadget_config().unwrap();
    assert_eq!(fs::read_to_string(&attr).unwrap(), "16");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(gadget
        .plan_gadget_config()
        .unwrap()
        .iter()
        .all(|p| p.action == Action::DoNothing));
}

#[test]
fn test_stale_symlink_removed() {
    let dir = tempdir().unwrap();
    let layout = test_layout(dir.path());
    let items = default_gadget_items();

    let mut tx = GadgetTransaction::new(&layout, &items, Devices::default(), UDC);
    tx.create_config_path();
    tx.write_gadget_config();
    tx.commit().unwrap();

    let mut tx = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    tx.create_config_path();
    tx.write_gadget_config();
    tx.commit().unwrap();

    let config = layout.config_path();
    let links: Vec<_> = fs::read_dir(&config)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().unwrap().is_symlink())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(links, ["hid.usb0"]);
}

#[test]
fn test_rebind_tolerates_unbound_controller() {
    let dir = tempdir().unwrap();
    let layout = test_layout(dir.path());
    let items = default_gadget_items();
    fs::write(layout.udc_driver_path.join("bind"), "").unwrap();

    let mut tx = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    tx.rebind_usb(true);
    tx.commit().unwrap();
    assert_eq!(
        fs::read_to_string(layout.udc_driver_path.join("bind")).unwrap(),
        UDC
    );

    let mut strict = GadgetTransaction::new(&layout, &items, keyboard_only(), UDC);
    strict.rebind_usb(false);
    assert!(matches!(strict.commit(), Err(AppError::ChangeFailed { .. })));
}
