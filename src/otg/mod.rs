//! OTG USB gadget assembled through configfs
//!
//! The gadget is described declaratively and reconciled, so applying the
//! same configuration twice leaves configfs untouched the second time.
//!
//! Architecture:
//! ```text
//! UsbGadget (lock, strict/lenient mode, UDC selection)
//!     └── GadgetTransaction (item table -> change set)
//!             └── ChangeSet (probe, resolve, order, apply)
//!                     └── configfs leaf I/O
//! ```

pub mod changeset;
pub mod configfs;
pub mod gadget;
pub mod hid;
pub mod items;
pub mod msd;
pub mod report_desc;
pub mod transaction;
pub mod udc;

pub use changeset::{Action, ChangeSet, FileState, PlannedChange, RequestedFileChange};
pub use gadget::{wait_for_devices, UsbGadget};
pub use hid::HidFunctionType;
pub use items::{default_gadget_items, is_item_enabled, GadgetItem, GadgetItems};
pub use msd::MsdLunConfig;
pub use transaction::GadgetTransaction;
