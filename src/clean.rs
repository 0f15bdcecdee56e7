//! Removal of working trees and build outputs.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::sources;

/// Remove the output tree (sources preserved).
pub fn clean_output(config: &Config) -> Result<()> {
    if remove_dir(&config.paths.output)? {
        println!("Clean complete (sources preserved).");
    } else {
        println!("No outputs to clean.");
    }
    Ok(())
}

/// Remove the kernel, firmware and AUFS working trees.
pub fn clean_sources(config: &Config) -> Result<()> {
    let mut cleaned = false;
    for tree in sources::trees(config) {
        cleaned |= remove_dir(&tree.path)?;
    }

    if cleaned {
        println!("Source trees removed. The next build clones fresh.");
    } else {
        println!("No source trees to clean.");
    }
    Ok(())
}

/// Remove everything.
pub fn clean_all(config: &Config) -> Result<()> {
    clean_sources(config)?;
    clean_output(config)
}

fn remove_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    println!("Removing {}...", dir.display());
    fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clean_sources_keeps_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vars = HashMap::from([
            ("BUILD_ROOT".to_string(), tmp.path().join("b").display().to_string()),
            ("OUTPUT_DIR".to_string(), tmp.path().join("o").display().to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        fs::create_dir_all(config.paths.kernel_src.join(".git")).unwrap();
        fs::create_dir_all(&config.paths.aufs_src).unwrap();
        fs::create_dir_all(config.paths.kernel_out()).unwrap();

        clean_sources(&config).unwrap();

        assert!(!config.paths.kernel_src.exists());
        assert!(!config.paths.aufs_src.exists());
        assert!(config.paths.kernel_out().exists());

        clean_all(&config).unwrap();
        assert!(!config.paths.output.exists());
    }
}
