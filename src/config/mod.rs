//! Configuration schema and persistence

mod schema;
mod store;

pub use schema::{AppConfig, StreamConfig, VideoConfig, WebConfig};
pub use store::ConfigStore;
