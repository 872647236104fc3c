//! UsbGadget - the composite gadget as seen by the rest of the system
//!
//! Every mutating entry point takes the same lock and runs to completion,
//! so reconciliations never interleave.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::changeset::PlannedChange;
use super::hid::HidFunctionType;
use super::items::{is_item_enabled, GadgetItems, ABSOLUTE_MOUSE, KEYBOARD, RELATIVE_MOUSE};
use super::transaction::GadgetTransaction;
use super::udc;
use crate::config::{AppConfig, Devices, GadgetConfig, GadgetLayout};
use crate::error::{AppError, Result};

const POLL_MIN_DELAY: Duration = Duration::from_millis(10);
const POLL_MAX_DELAY: Duration = Duration::from_millis(100);

struct GadgetState {
    items: GadgetItems,
    devices: Devices,
    config: GadgetConfig,
    udc: Option<String>,
}

/// A configfs USB gadget reconciled from an item table
pub struct UsbGadget {
    layout: GadgetLayout,
    state: Mutex<GadgetState>,
}

impl UsbGadget {
    pub fn new(
        name: &str,
        items: GadgetItems,
        devices: Devices,
        config: GadgetConfig,
        mut layout: GadgetLayout,
    ) -> Self {
        layout.gadget_name = name.to_string();
        Self {
            layout,
            state: Mutex::new(GadgetState {
                items: items.with_gadget_config(&config),
                devices,
                config,
                udc: None,
            }),
        }
    }

    /// Gadget with the default item table
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.layout.gadget_name,
            GadgetItems::default(),
            config.devices,
            config.gadget.clone(),
            config.layout.clone(),
        )
    }

    pub fn layout(&self) -> &GadgetLayout {
        &self.layout
    }

    /// Controller picked by `init`
    pub fn udc(&self) -> Option<String> {
        self.state.lock().udc.clone()
    }

    /// Pick the first controller found without touching the gadget
    pub fn select_udc(&self) -> Result<String> {
        let mut state = self.state.lock();
        Self::select_udc_locked(&self.layout, &mut state)
    }

    fn select_udc_locked(layout: &GadgetLayout, state: &mut GadgetState) -> Result<String> {
        let udcs = udc::find_udcs(&layout.udc_discovery_path);
        let first = udcs.into_iter().next().ok_or(AppError::NoUdc)?;
        info!("Using UDC {}", first);
        state.udc = Some(first.clone());
        Ok(first)
    }

    /// Pick the first controller and assemble the gadget
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        let strict = state.config.strict_mode;

        if let Err(e) = Self::select_udc_locked(&self.layout, &mut state) {
            return lenient(strict, "Skipping USB stack init", e);
        }

        self.configure(&state)
            .or_else(|e| lenient(strict, "Unable to initialize USB stack", e))
    }

    /// Reconcile configfs with the current items, devices and config
    pub fn update_gadget_config(&self) -> Result<()> {
        let state = self.state.lock();
        self.configure(&state)
            .or_else(|e| lenient(state.config.strict_mode, "Unable to update gadget config", e))
    }

    /// `update_gadget_config` off the async executor
    pub async fn update_gadget_config_async(self: Arc<Self>) -> Result<()> {
        tokio::task::spawn_blocking(move || self.update_gadget_config())
            .await
            .map_err(|e| AppError::Internal(format!("Gadget update task failed: {}", e)))?
    }

    /// What `update_gadget_config` would do, without doing it
    pub fn plan_gadget_config(&self) -> Result<Vec<PlannedChange>> {
        let state = self.state.lock();
        let udc = state.udc.as_deref().ok_or(AppError::NoUdc)?;
        self.transaction(&state, udc).plan()
    }

    /// Replace descriptor settings; applied by the next update
    pub fn set_gadget_config(&self, config: GadgetConfig) {
        let mut state = self.state.lock();
        state.items = state.items.clone().with_gadget_config(&config);
        state.config = config;
    }

    /// Replace the enabled function set; applied by the next update
    pub fn set_gadget_devices(&self, devices: Devices) {
        self.state.lock().devices = devices;
    }

    /// Set one attribute of one item; applied by the next update.
    ///
    /// Returns whether the value changed.
    pub fn override_gadget_config(&self, item: &str, attr: &str, value: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let entry = state
            .items
            .get_mut(item)
            .ok_or_else(|| AppError::NotFound(format!("Gadget config item {}", item)))?;
        if entry.attrs.get(attr).map(String::as_str) == Some(value) {
            return Ok(false);
        }
        entry.attrs.insert(attr.to_string(), value.to_string());
        info!(item, attr, value, "Overriding gadget config");
        Ok(true)
    }

    /// Force the host to re-enumerate the gadget
    pub fn rebind_usb(&self, ignore_unbind_error: bool) -> Result<()> {
        let state = self.state.lock();
        let udc = state.udc.as_deref().ok_or(AppError::NoUdc)?;
        info!(udc, "Rebinding USB gadget to UDC");

        let mut tx = GadgetTransaction::new(&self.layout, &state.items, state.devices, udc);
        tx.rebind_usb(ignore_unbind_error);
        tx.commit()
    }

    /// Directory of `item` under the gadget root
    pub fn get_path(&self, item: &str) -> Result<PathBuf> {
        let state = self.state.lock();
        let entry = state
            .items
            .get(item)
            .ok_or_else(|| AppError::NotFound(format!("Gadget config item {}", item)))?;
        Ok(entry
            .path
            .iter()
            .fold(self.layout.gadget_path(), |path, p| path.join(p)))
    }

    /// Location of `item` under `configs/c.1`
    pub fn get_config_path(&self, item: &str) -> Result<PathBuf> {
        let state = self.state.lock();
        let config_path = state
            .items
            .get(item)
            .and_then(|entry| entry.config_path.as_ref())
            .ok_or_else(|| AppError::NotFound(format!("Gadget config path for {}", item)))?;
        Ok(config_path
            .iter()
            .fold(self.layout.config_path(), |path, p| path.join(p)))
    }

    pub fn is_udc_bound(&self) -> Result<bool> {
        let udc = self.udc().ok_or(AppError::NoUdc)?;
        udc::is_udc_bound(&self.layout.udc_driver_path, &udc)
    }

    pub fn bind_udc(&self) -> Result<()> {
        let udc = self.udc().ok_or(AppError::NoUdc)?;
        udc::bind_udc(&self.layout.udc_driver_path, &udc)
    }

    pub fn unbind_udc(&self) -> Result<()> {
        let udc = self.udc().ok_or(AppError::NoUdc)?;
        udc::unbind_udc(&self.layout.udc_driver_path, &udc)
    }

    /// Kernel-reported connection state, e.g. "configured" or "not attached"
    pub fn get_usb_state(&self) -> String {
        match self.udc() {
            Some(udc) => udc::usb_state(&self.layout.udc_class_path, &udc),
            None => udc::STATE_NOT_ATTACHED.to_string(),
        }
    }

    /// `/dev/hidgN` nodes of the enabled HID functions
    pub fn hid_device_paths(&self) -> Vec<PathBuf> {
        let devices = self.state.lock().devices;
        [
            (KEYBOARD, HidFunctionType::Keyboard),
            (ABSOLUTE_MOUSE, HidFunctionType::MouseAbsolute),
            (RELATIVE_MOUSE, HidFunctionType::MouseRelative),
        ]
        .into_iter()
        .filter(|(key, _)| is_item_enabled(key, &devices))
        .map(|(_, func)| func.device_path())
        .collect()
    }

    /// Wait until the enabled HID device nodes show up
    pub async fn wait_for_hid_devices(&self, timeout_ms: u64) -> bool {
        wait_for_devices(&self.hid_device_paths(), timeout_ms).await
    }

    fn transaction<'a>(&'a self, state: &'a GadgetState, udc: &str) -> GadgetTransaction<'a> {
        let mut tx = GadgetTransaction::new(&self.layout, &state.items, state.devices, udc);
        if self.layout.mount_configfs {
            tx.mount_configfs();
        }
        tx.create_config_path();
        tx.write_gadget_config();
        tx
    }

    fn configure(&self, state: &GadgetState) -> Result<()> {
        let udc = state.udc.as_deref().ok_or(AppError::NoUdc)?;
        debug!(udc, gadget = %self.layout.gadget_name, "Configuring USB gadget");

        self.transaction(state, udc).commit()?;
        info!(udc, "USB gadget configured");
        Ok(())
    }
}

/// Errors that no mode may hide: the batch itself is malformed
fn is_batch_error(err: &AppError) -> bool {
    matches!(
        err,
        AppError::DependencyCycle(_)
            | AppError::UnknownAction { .. }
            | AppError::DuplicateChange(_)
            | AppError::MissingConditionalChange(_)
    )
}

/// Return `err` in strict mode, log it and carry on otherwise
fn lenient(strict: bool, context: &str, err: AppError) -> Result<()> {
    if strict || is_batch_error(&err) {
        error!("{}: {}", context, err);
        return Err(err);
    }
    warn!("{}: {}", context, err);
    Ok(())
}

/// Poll until every path in `device_paths` exists, backing off from 10ms
/// to 100ms between checks
pub async fn wait_for_devices(device_paths: &[PathBuf], timeout_ms: u64) -> bool {
    let all_present = || device_paths.iter().all(|p| p.exists());
    let poll = async {
        let mut delay = POLL_MIN_DELAY;
        while !all_present() {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX_DELAY);
        }
    };

    tokio::time::timeout(Duration::from_millis(timeout_ms), poll)
        .await
        .is_ok()
        || all_present()
}
