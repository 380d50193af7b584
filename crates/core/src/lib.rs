//! # tether-core
//!
//! Core error type, result alias, and layered configuration shared by
//! every tether crate and the `tether` binary.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{
    load_config, BindingConfig, Config, LoggingConfig, PropagationConfig, ReconcileConfig,
    RuntimeConfig,
};
pub use error::Error;
pub use result::Result;
