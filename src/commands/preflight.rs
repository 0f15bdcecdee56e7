//! Preflight command - runs preflight checks.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, strict: bool) -> Result<()> {
    let report = preflight::run_preflight(config);
    report.print();

    if !report.all_passed() {
        if strict {
            bail!("{} preflight check(s) failed", report.fail_count());
        }
        println!("Some checks failed. Use --strict to exit non-zero.");
    }
    Ok(())
}
