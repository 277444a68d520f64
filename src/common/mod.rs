//! Common utilities shared between the supervisor and client agents

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
