pub mod artifacts;
pub mod bridge;
pub mod config;
pub mod context;
pub mod fallback;
pub mod fixture;
pub mod otp;
pub mod process;
pub mod reaper;
pub mod script;
pub mod session;
pub mod step;
pub mod verifier;
pub mod workflow;

pub use uiflow_common::error;
pub use uiflow_common::model;
pub use uiflow_common::protocol;
