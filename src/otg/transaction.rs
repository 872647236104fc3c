//! Gadget transaction: the change set describing one composite gadget
//!
//! A transaction only collects changes; nothing touches configfs until
//! [`GadgetTransaction::commit`]. The usual sequence is
//!
//! ```text
//! mount_configfs -> create_config_path -> write_gadget_config -> commit
//! ```
//!
//! `write_gadget_config` ends with the `reorder-symlinks` change and the
//! `udc` bind, so the host sees interfaces in table order once the gadget
//! goes live.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::changeset::types::path_key;
use super::changeset::{ChangeSet, FileState, PlannedChange, RequestedFileChange, Symlink, When};
use super::items::{is_item_enabled, GadgetItem, GadgetItems};
use crate::config::{Devices, GadgetLayout};
use crate::error::Result;

const COMPONENT: &str = "gadget";

/// Key of the change ordering the configuration symlinks
pub const REORDER_SYMLINKS_KEY: &str = "reorder-symlinks";

/// Key of the change binding the gadget to its controller
pub const UDC_KEY: &str = "udc";

fn join_path(base: &Path, parts: &[String]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |path, p| path.join(p))
}

/// Builder for one reconciliation batch
pub struct GadgetTransaction<'a> {
    layout: &'a GadgetLayout,
    items: &'a GadgetItems,
    devices: Devices,
    udc: String,
    changes: ChangeSet,
    /// Directories already asserted in this batch
    dirs: HashSet<PathBuf>,
}

impl<'a> GadgetTransaction<'a> {
    pub fn new(layout: &'a GadgetLayout, items: &'a GadgetItems, devices: Devices, udc: &str) -> Self {
        Self {
            layout,
            items,
            devices,
            udc: udc.to_string(),
            changes: ChangeSet::new(),
            dirs: HashSet::new(),
        }
    }

    fn configfs_key(&self) -> String {
        path_key(&self.layout.configfs_path)
    }

    fn config_key(&self) -> String {
        path_key(&self.layout.config_path())
    }

    fn gadget_key(&self) -> String {
        path_key(&self.layout.gadget_path())
    }

    fn add_dir(&mut self, path: PathBuf, depends_on: Vec<String>, description: &str) -> String {
        let key = path_key(&path);
        if self.dirs.insert(path.clone()) {
            self.changes.add_change(
                RequestedFileChange::new(COMPONENT, path, FileState::Directory)
                    .depends_on(depends_on)
                    .with_description(description),
            );
        }
        key
    }

    /// Assert every directory from `base` down to `base/parts...`, returning
    /// the key of the deepest one
    fn mkdir_all(&mut self, base: &Path, base_key: String, parts: &[String]) -> String {
        let mut path = base.to_path_buf();
        let mut key = base_key;
        for part in parts {
            path = path.join(part);
            key = self.add_dir(path.clone(), vec![key], "create directory");
        }
        key
    }

    /// Assert configfs is mounted at its fixed location
    pub fn mount_configfs(&mut self) {
        let change =
            RequestedFileChange::new(COMPONENT, &self.layout.configfs_path, FileState::MountedConfigFS)
                .with_description("mount configfs");
        self.changes.add_change(change);
    }

    /// Create `configs/c.1` (and with it the gadget root)
    pub fn create_config_path(&mut self) {
        let deps = vec![self.configfs_key()];
        self.add_dir(self.layout.config_path(), deps, "create config path");
    }

    /// Declare the whole gadget: root, items in table order, symlink order
    /// and the UDC bind
    pub fn write_gadget_config(&mut self) {
        let deps = vec![self.config_key()];
        self.add_dir(self.layout.gadget_path(), deps, "create gadget");

        let items = self.items;
        let disable_keys: Vec<String> = items
            .ordered()
            .into_iter()
            .filter(|(_, item)| item.is_linked())
            .map(|(_, item)| item.disable_key())
            .collect();

        let mut symlinks = Vec::new();
        let mut deps = vec![self.gadget_key()];
        for (key, item) in items.ordered() {
            if item.is_linked() {
                self.disable_gadget_item(item);
            }
            if !is_item_enabled(key, &self.devices) {
                trace!(item = key, "Gadget item disabled");
                continue;
            }
            deps = self.write_gadget_item(item, deps, &disable_keys, &mut symlinks);
        }

        let reorder = RequestedFileChange::new(
            COMPONENT,
            self.layout.config_path(),
            FileState::SymlinkInOrderConfigFS,
        )
        .with_key(REORDER_SYMLINKS_KEY)
        .with_symlinks(symlinks)
        .depends_on(deps)
        .with_description("order config symlinks");
        self.changes.add_change(reorder);

        self.write_udc();
    }

    /// Conditional removal of the item's configuration symlink
    fn disable_gadget_item(&mut self, item: &GadgetItem) {
        let Some(config_path) = &item.config_path else {
            return;
        };
        let change = RequestedFileChange::new(
            COMPONENT,
            join_path(&self.layout.config_path(), config_path),
            FileState::Absent,
        )
        .with_key(item.disable_key())
        .when(When::BeforeChange)
        .depends_on([self.config_key()])
        .with_description("remove config symlink");
        self.changes.add_change(change);
    }

    /// Declare one enabled item, returning the keys the next item depends on
    fn write_gadget_item(
        &mut self,
        item: &GadgetItem,
        deps: Vec<String>,
        disable_keys: &[String],
        symlinks: &mut Vec<Symlink>,
    ) -> Vec<String> {
        let gadget_path = self.layout.gadget_path();
        let item_path = join_path(&gadget_path, &item.path);
        let mut item_key = path_key(&gadget_path);
        for depth in 1..=item.path.len() {
            let mut dir_deps = vec![item_key];
            if depth == item.path.len() {
                dir_deps.extend(deps.iter().cloned());
            }
            let path = join_path(&gadget_path, &item.path[..depth]);
            item_key = self.add_dir(path, dir_deps, "create gadget item directory");
        }

        // Function attributes are locked while the function is linked
        let before_change: Vec<String> = if item.is_linked() {
            disable_keys.to_vec()
        } else {
            Vec::new()
        };

        let mut files = vec![item_key.clone()];
        for (name, value) in &item.attrs {
            let change = RequestedFileChange::new(COMPONENT, item_path.join(name), FileState::FileContentMatch)
                .with_content(value.as_bytes())
                .depends_on([item_key.clone()])
                .before_change(before_change.iter().cloned())
                .with_description("write gadget attribute");
            files.push(change.key());
            self.changes.add_change(change);
        }

        if let Some(desc) = &item.report_desc {
            let path = item_path.join("report_desc");
            let change = if desc.is_empty() {
                RequestedFileChange::new(COMPONENT, path, FileState::Absent)
                    .with_description("remove report descriptor")
            } else {
                RequestedFileChange::new(COMPONENT, path, FileState::FileContentMatch)
                    .with_content(desc.clone())
                    .with_description("write report descriptor")
            }
            .depends_on([item_key.clone()])
            .before_change(before_change.iter().cloned());
            files.push(change.key());
            self.changes.add_change(change);
        }

        if let Some(config_path) = &item.config_path {
            let config_root = self.layout.config_path();
            if item.is_linked() {
                symlinks.push(Symlink::new(join_path(&config_root, config_path), item_path));
            } else {
                let config_key = self.config_key();
                let dir_key = self.mkdir_all(&config_root, config_key, config_path);
                let config_item_path = join_path(&config_root, config_path);
                for (name, value) in &item.config_attrs {
                    let change = RequestedFileChange::new(
                        COMPONENT,
                        config_item_path.join(name),
                        FileState::FileContentMatch,
                    )
                    .with_content(value.as_bytes())
                    .depends_on([dir_key.clone()])
                    .with_description("write config attribute");
                    files.push(change.key());
                    self.changes.add_change(change);
                }
            }
        }

        files
    }

    /// Bind the gadget to the controller once the symlinks are in order
    fn write_udc(&mut self) {
        let change = RequestedFileChange::new(
            COMPONENT,
            self.layout.gadget_path().join("UDC"),
            FileState::FileContentMatch,
        )
        .with_key(UDC_KEY)
        .with_content(self.udc.as_bytes())
        .depends_on([REORDER_SYMLINKS_KEY])
        .with_description("bind gadget to UDC");
        self.changes.add_change(change);
    }

    /// Force the controller driver to re-enumerate: unbind, then bind
    pub fn rebind_usb(&mut self, ignore_unbind_error: bool) {
        let unbind = RequestedFileChange::new(
            COMPONENT,
            self.layout.udc_driver_path.join("unbind"),
            FileState::FileWrite,
        )
        .with_content(self.udc.as_bytes())
        .depends_on([UDC_KEY])
        .ignore_errors(ignore_unbind_error)
        .with_description("unbind UDC");
        let unbind_key = unbind.key();
        self.changes.add_change(unbind);

        let bind = RequestedFileChange::new(
            COMPONENT,
            self.layout.udc_driver_path.join("bind"),
            FileState::FileWrite,
        )
        .with_content(self.udc.as_bytes())
        .depends_on([unbind_key])
        .with_description("bind UDC");
        self.changes.add_change(bind);
    }

    pub fn changeset(&self) -> &ChangeSet {
        &self.changes
    }

    /// Resolve without applying
    pub fn plan(&self) -> Result<Vec<PlannedChange>> {
        self.changes.plan()
    }

    /// Resolve and apply the collected changes
    pub fn commit(self) -> Result<()> {
        self.changes.apply()
    }
}
