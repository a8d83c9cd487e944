pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
pub use uiflow_common::config::*;
