//! Persistent application configuration

mod schema;
mod store;

pub use schema::{AppConfig, Devices, GadgetConfig, GadgetLayout};
pub use store::ConfigStore;
