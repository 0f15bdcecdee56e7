//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Run the kernel build pipeline
//! - `clean` - Remove source trees or outputs
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
pub mod clean;
mod preflight;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
