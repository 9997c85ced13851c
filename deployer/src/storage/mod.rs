//! Persistence and on-disk configuration

pub mod layout;
pub mod memory;
pub mod settings;
pub mod store;
