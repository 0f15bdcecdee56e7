//! Show command - displays information.

use anyhow::Result;

use crate::artifacts::MANIFEST;
use crate::config::Config;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show resolved configuration
    Config,
    /// Show the manifest of the last build
    Manifest,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Manifest => {
            let path = config.paths.output.join(MANIFEST);
            if !path.exists() {
                anyhow::bail!(
                    "No manifest at {}. Run 'rpi-kbuild build' first.",
                    path.display()
                );
            }
            print!("{}", std::fs::read_to_string(&path)?);
            println!();
        }
    }
    Ok(())
}
