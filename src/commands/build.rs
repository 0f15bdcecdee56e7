//! Build command - runs the kernel build pipeline.

use anyhow::Result;

use crate::config::{Config, FailPolicy};
use crate::pipeline::{self, BuildReport};
use crate::process::Runner;

/// Execute the build command.
///
/// Prints the settings report first, then runs every stage.
pub fn cmd_build(config: &Config, runner: &dyn Runner, keep_going: bool) -> Result<BuildReport> {
    let mut config = config.clone();
    if keep_going {
        config.fail_policy = FailPolicy::Continue;
    }

    println!("=== Raspberry Pi Kernel Build ===\n");
    config.print();

    pipeline::build(&config, runner)
}
