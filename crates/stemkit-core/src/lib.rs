//! Stemkit Core - background audio preparation and stem separation
//!
//! Long-running prepare and separation tasks run on their own worker
//! threads behind integer handles; hosts poll, cancel, fetch results and
//! destroy them through [`Runtime`].

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
mod handle;
pub mod hooks;
pub mod last_error;
pub mod pipeline;
pub mod result;
pub mod service;
pub mod task;
pub mod types;

pub use error::{ErrorCode, StageError, StemkitError};
pub use service::{Runtime, DEFAULT_PREPARE_PREFIX, DEFAULT_SEPARATION_PREFIX};
pub use types::*;
