//! Configuration
//!
//! [`AppConfig`] is loaded from TOML into a [`ConfigStore`]; sessions take
//! a snapshot of it when they are created.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
