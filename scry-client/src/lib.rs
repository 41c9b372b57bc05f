//! # scry-client
//!
//! Command-line front end of scry. Loads the configuration, connects to
//! the device through `adb` and drives the `scry-core` pipeline against
//! a headless display sink fed by the operator console.

pub mod config;
pub mod console;
pub mod display;
