//! otg-gadget - declarative USB OTG gadget configuration
//!
//! Builds a composite keyboard, mouse and mass-storage gadget in configfs
//! by reconciling a declared change set against what is on disk.

pub mod config;
pub mod error;
pub mod otg;

pub use error::{AppError, Result};
