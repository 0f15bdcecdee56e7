//! Clean command - removes source trees and build outputs.

use anyhow::Result;

use crate::clean;
use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Clean the output tree only (default)
    Output,
    /// Clean the kernel, firmware and AUFS trees
    Sources,
    /// Clean everything
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Output => clean::clean_output(config),
        CleanTarget::Sources => clean::clean_sources(config),
        CleanTarget::All => clean::clean_all(config),
    }
}
