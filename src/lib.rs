//! rpi-kbuild library exports.
//!
//! The binary is a thin CLI over these modules; tests drive them directly.

pub mod artifacts;
pub mod clean;
pub mod commands;
pub mod config;
pub mod fsutil;
pub mod kconfig;
pub mod kernel;
pub mod patch;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod sources;
pub mod timing;
