//! AUFS patching of the kernel tree.
//!
//! Three sub-stages, in order: copy AUFS sources into the kernel tree, append
//! the lines Kbuild needs, then apply the AUFS diff series with `patch -p1`.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::fsutil::copy_tree;
use crate::process::{Cmd, Runner};

/// A file or directory copied from the AUFS tree into the kernel tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopySpec {
    /// Relative to the AUFS tree.
    pub source: &'static str,
    /// Relative to the kernel tree.
    pub dest: &'static str,
}

/// A literal line that must be present in a kernel file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendSpec {
    pub text: &'static str,
    /// Relative to the kernel tree.
    pub target: &'static str,
}

pub const AUFS_COPIES: &[CopySpec] = &[
    CopySpec {
        source: "Documentation",
        dest: "Documentation",
    },
    CopySpec {
        source: "fs",
        dest: "fs",
    },
    CopySpec {
        source: "include/uapi/linux/aufs_type.h",
        dest: "include/uapi/linux/aufs_type.h",
    },
];

pub const AUFS_APPENDS: &[AppendSpec] = &[AppendSpec {
    text: "header-y += aufs_type.h",
    target: "include/uapi/linux/Kbuild",
}];

/// Applied in this order; later patches touch files the earlier ones created.
pub const AUFS_PATCHES: &[&str] = &[
    "aufs4-kbuild.patch",
    "aufs4-base.patch",
    "aufs4-mmap.patch",
    "aufs4-standalone.patch",
];

/// Outcome of applying one diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    AlreadyApplied,
}

/// Run all three sub-stages against the kernel tree.
pub fn apply_aufs(config: &Config, runner: &dyn Runner) -> Result<()> {
    let aufs = &config.paths.aufs_src;
    let kernel = &config.paths.kernel_src;

    println!("  Copying AUFS sources into kernel tree...");
    copy_specs(aufs, kernel, AUFS_COPIES)?;

    for spec in AUFS_APPENDS {
        if append_line(&kernel.join(spec.target), spec.text)? {
            println!("  Appended '{}' to {}", spec.text, spec.target);
        }
    }

    for name in AUFS_PATCHES {
        match apply_patch(kernel, &aufs.join(name), runner)? {
            PatchOutcome::Applied => println!("  Applied {}", name),
            PatchOutcome::AlreadyApplied => println!("  [SKIP] {} already applied", name),
        }
    }
    Ok(())
}

/// Copy each spec from `src_root` to `dst_root`.
pub fn copy_specs(src_root: &Path, dst_root: &Path, specs: &[CopySpec]) -> Result<()> {
    for spec in specs {
        let src = src_root.join(spec.source);
        let dst = dst_root.join(spec.dest);
        let bytes = copy_tree(&src, &dst)
            .with_context(|| format!("Failed to copy {} into kernel tree", spec.source))?;
        tracing::debug!(source = spec.source, bytes, "copied");
    }
    Ok(())
}

/// Append `text` as a new line unless some line already contains it.
///
/// Returns true if the file was modified. Creates the file if missing.
pub fn append_line(target: &Path, text: &str) -> Result<bool> {
    let existing = match fs::read_to_string(target) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", target.display()))
        }
    };

    if existing.lines().any(|l| l.contains(text)) {
        return Ok(false);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .with_context(|| format!("Failed to open {}", target.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    writeln!(file, "{}", text)?;
    Ok(true)
}

/// Apply one unified diff at `kernel` root with `-p1`.
///
/// A patch whose reverse applies cleanly is treated as already applied.
/// Any other failure is an error.
pub fn apply_patch(kernel: &Path, patch: &Path, runner: &dyn Runner) -> Result<PatchOutcome> {
    let patch_arg = patch.to_string_lossy().into_owned();

    let reverse = Cmd::new("patch")
        .args(["-p1", "-R", "--dry-run", "--silent", "-i", patch_arg.as_str()])
        .dir(kernel)
        .allow_fail()
        .run_with(runner)?;
    if reverse.success() {
        return Ok(PatchOutcome::AlreadyApplied);
    }

    Cmd::new("patch")
        .args(["-p1", "--forward", "-i", patch_arg.as_str()])
        .dir(kernel)
        .error_msg(format!("Patch {} does not apply", patch.display()))
        .run_with(runner)?;
    Ok(PatchOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::Recorder;
    use crate::process::CommandResult;
    use tempfile::TempDir;

    #[test]
    fn test_append_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let kbuild = tmp.path().join("Kbuild");
        fs::write(&kbuild, "header-y += a.out.h\nheader-y += acct.h").unwrap();

        assert!(append_line(&kbuild, "header-y += aufs_type.h").unwrap());
        let once = fs::read_to_string(&kbuild).unwrap();
        assert!(!append_line(&kbuild, "header-y += aufs_type.h").unwrap());
        let twice = fs::read_to_string(&kbuild).unwrap();

        assert_eq!(once, twice);
        assert_eq!(
            once,
            "header-y += a.out.h\nheader-y += acct.h\nheader-y += aufs_type.h\n"
        );
    }

    #[test]
    fn test_append_creates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("Kbuild");
        assert!(append_line(&target, "header-y += aufs_type.h").unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "header-y += aufs_type.h\n");
    }

    #[test]
    fn test_copy_specs_into_kernel() {
        let tmp = TempDir::new().unwrap();
        let aufs = tmp.path().join("aufs");
        let kernel = tmp.path().join("linux");
        fs::create_dir_all(aufs.join("fs/aufs")).unwrap();
        fs::create_dir_all(aufs.join("Documentation/filesystems/aufs")).unwrap();
        fs::create_dir_all(aufs.join("include/uapi/linux")).unwrap();
        fs::write(aufs.join("fs/aufs/super.c"), "int x;").unwrap();
        fs::write(aufs.join("Documentation/filesystems/aufs/README"), "doc").unwrap();
        fs::write(aufs.join("include/uapi/linux/aufs_type.h"), "#pragma once").unwrap();
        fs::create_dir_all(kernel.join("fs/ext4")).unwrap();

        copy_specs(&aufs, &kernel, AUFS_COPIES).unwrap();

        assert!(kernel.join("fs/aufs/super.c").is_file());
        assert!(kernel.join("fs/ext4").is_dir());
        assert!(kernel.join("Documentation/filesystems/aufs/README").is_file());
        assert!(kernel.join("include/uapi/linux/aufs_type.h").is_file());
    }

    #[test]
    fn test_patch_applied_with_strip_one() {
        let tmp = TempDir::new().unwrap();
        let recorder = Recorder::with(|cmd| {
            if cmd.has_arg("-R") {
                CommandResult::exit(1)
            } else {
                CommandResult::ok()
            }
        });
        let patch = tmp.path().join("aufs4-base.patch");

        let outcome = apply_patch(tmp.path(), &patch, &recorder).unwrap();

        assert_eq!(outcome, PatchOutcome::Applied);
        let calls = recorder.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].has_arg("-p1"));
        assert_eq!(calls[1].current_dir(), Some(tmp.path()));
    }

    #[test]
    fn test_already_applied_patch_skipped() {
        let tmp = TempDir::new().unwrap();
        let recorder = Recorder::new();
        let outcome =
            apply_patch(tmp.path(), &tmp.path().join("aufs4-mmap.patch"), &recorder).unwrap();
        assert_eq!(outcome, PatchOutcome::AlreadyApplied);
        assert_eq!(recorder.calls().len(), 1);
    }

    #[test]
    fn test_failing_patch_is_error() {
        let tmp = TempDir::new().unwrap();
        let recorder = Recorder::with(|_| CommandResult::exit(1));
        let err = apply_patch(tmp.path(), &tmp.path().join("aufs4-kbuild.patch"), &recorder)
            .unwrap_err();
        assert!(err.to_string().contains("does not apply"));
    }
}
