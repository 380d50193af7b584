//! # tether
//!
//! Runs the claim binding, class defaulting, secret propagation and
//! readiness gate loops over an in-memory store loaded from a manifest.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod driver;
pub mod manifest;
pub mod provisioner;
pub mod system;

pub use driver::{Controller, Convergence, Driver, DriverConfig, DriverStopper, RoundOutcome};
pub use system::{assemble, BindingKinds, System};
