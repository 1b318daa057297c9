//! Configuration: schema and TOML-backed store

mod schema;
mod store;

pub use schema::*;
pub use store::ConfigStore;
