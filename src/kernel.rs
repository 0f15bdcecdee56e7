//! Kernel cross-compilation and module installation.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::fsutil::count_files;
use crate::process::{Cmd, Runner};

pub const ARCH: &str = "arm";

/// Image produced by the compile phase, relative to the kernel tree.
pub const KERNEL_IMAGE: &str = "arch/arm/boot/zImage";

/// `make` in the kernel tree with the target architecture and toolchain set.
pub fn make(config: &Config) -> Cmd {
    Cmd::new("make")
        .dir(&config.paths.kernel_src)
        .arg(format!("ARCH={}", ARCH))
        .arg(format!("CROSS_COMPILE={}", config.cross_compile()))
}

/// Path of the compiled kernel image.
pub fn image_path(config: &Config) -> PathBuf {
    config.paths.kernel_src.join(KERNEL_IMAGE)
}

/// Build the kernel image and modules.
///
/// Runs with `-k` so one failing unit does not stop the rest of the build;
/// the exit status still reports the failure.
pub fn compile(config: &Config, runner: &dyn Runner) -> Result<()> {
    println!(
        "  Building zImage and modules with {} jobs...",
        config.parallelism
    );
    make(config)
        .arg("-k")
        .arg(format!("-j{}", config.parallelism))
        .args(["zImage", "modules"])
        .interactive()
        .error_msg("Kernel build failed")
        .run_with(runner)?;

    println!("  Built {}", KERNEL_IMAGE);
    Ok(())
}

/// Install modules into the output modules directory. Returns module count.
pub fn install_modules(config: &Config, runner: &dyn Runner) -> Result<usize> {
    let staging = config.paths.modules_out();
    fs::create_dir_all(&staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;

    println!("  Installing modules to {}...", staging.display());
    make(config)
        .arg(format!("INSTALL_MOD_PATH={}", staging.display()))
        .arg("modules_install")
        .interactive()
        .error_msg("Module install failed")
        .run_with(runner)?;

    let count = count_files(&staging, &[".ko"]);
    println!("  Installed {} kernel modules", count);
    Ok(count)
}
