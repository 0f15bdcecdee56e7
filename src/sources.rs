//! Source tree acquisition.
//!
//! Three independent trees feed the build: the kernel, the firmware (sparse,
//! `boot/` only) and the AUFS patch set. All three are either cloned fresh
//! or reused as a group.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, Remote};
use crate::process::{Cmd, Runner};

/// Subdirectory of the firmware repository that gets checked out.
pub const FIRMWARE_SUBDIR: &str = "boot";

/// Depth used for the sparse firmware pull.
const FIRMWARE_DEPTH: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Kernel,
    Firmware,
    Aufs,
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TreeKind::Kernel => "kernel",
            TreeKind::Firmware => "firmware",
            TreeKind::Aufs => "aufs",
        })
    }
}

/// How a tree is materialized on a fresh clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkout {
    /// Whole repository at the branch.
    Full { depth: Option<u32> },
    /// Only `subdir`, via sparse checkout.
    Sparse { subdir: String },
}

/// A working directory bound to a git remote and branch.
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub kind: TreeKind,
    pub url: String,
    pub branch: String,
    pub path: PathBuf,
    pub checkout: Checkout,
}

impl SourceTree {
    fn new(kind: TreeKind, remote: &Remote, path: &Path, checkout: Checkout) -> Self {
        Self {
            kind,
            url: remote.url.clone(),
            branch: remote.branch.clone(),
            path: path.to_path_buf(),
            checkout,
        }
    }

    /// True if the tree has been cloned before.
    pub fn is_present(&self) -> bool {
        self.path.join(".git").is_dir()
    }
}

/// The three trees, in acquisition order.
pub fn trees(config: &Config) -> Vec<SourceTree> {
    let paths = &config.paths;
    vec![
        SourceTree::new(
            TreeKind::Kernel,
            &config.kernel,
            &paths.kernel_src,
            Checkout::Full {
                depth: config.git_depth,
            },
        ),
        SourceTree::new(
            TreeKind::Firmware,
            &config.firmware,
            &paths.firmware_src,
            Checkout::Sparse {
                subdir: FIRMWARE_SUBDIR.to_string(),
            },
        ),
        SourceTree::new(
            TreeKind::Aufs,
            &config.aufs,
            &paths.aufs_src,
            Checkout::Full {
                depth: config.git_depth,
            },
        ),
    ]
}

/// Decided acquisition strategy for the whole group of trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Remove and re-clone every tree.
    Fresh,
    /// Keep existing trees; pull them if `update` is set.
    Reuse { update: bool },
}

/// Pick the acquisition mode. Reuse silently downgrades to a fresh clone of
/// all trees if any one of them is missing.
pub fn plan(config: &Config, trees: &[SourceTree]) -> AcquireMode {
    if !config.use_existing_src {
        return AcquireMode::Fresh;
    }

    let missing: Vec<String> = trees
        .iter()
        .filter(|t| !t.is_present())
        .map(|t| t.kind.to_string())
        .collect();

    if missing.is_empty() {
        AcquireMode::Reuse {
            update: config.update_existing,
        }
    } else {
        tracing::warn!(
            missing = %missing.join(", "),
            "USE_EXISTING_SRC requested but sources are missing, cloning all trees fresh"
        );
        AcquireMode::Fresh
    }
}

/// Acquire all source trees according to `config`.
pub fn acquire(config: &Config, runner: &dyn Runner) -> Result<AcquireMode> {
    let trees = trees(config);
    let mode = plan(config, &trees);

    match mode {
        AcquireMode::Fresh => {
            for tree in &trees {
                fresh_clone(tree, runner)?;
            }
        }
        AcquireMode::Reuse { update: true } => {
            for tree in &trees {
                update(tree, runner)?;
            }
        }
        AcquireMode::Reuse { update: false } => {
            tracing::info!("[SKIP] Reusing existing sources without update");
        }
    }

    Ok(mode)
}

/// Remove `tree.path` if present and clone it again.
pub fn fresh_clone(tree: &SourceTree, runner: &dyn Runner) -> Result<()> {
    if tree.path.exists() {
        tracing::info!("Removing existing {} tree {}", tree.kind, tree.path.display());
        fs::remove_dir_all(&tree.path)
            .with_context(|| format!("Failed to remove {}", tree.path.display()))?;
    }
    fs::create_dir_all(&tree.path)
        .with_context(|| format!("Failed to create {}", tree.path.display()))?;

    tracing::info!(url = %tree.url, branch = %tree.branch, "Cloning {} source", tree.kind);

    match &tree.checkout {
        Checkout::Full { depth } => {
            let mut cmd = Cmd::new("git").args(["clone", "--branch", tree.branch.as_str()]);
            if let Some(depth) = depth {
                cmd = cmd.arg(format!("--depth={}", depth));
            }
            cmd.arg(&tree.url)
                .arg_path(&tree.path)
                .interactive()
                .error_msg(format!("git clone failed for {}", tree.url))
                .run_with(runner)?;
        }
        Checkout::Sparse { subdir } => sparse_clone(tree, subdir, runner)?,
    }

    Ok(())
}

fn sparse_clone(tree: &SourceTree, subdir: &str, runner: &dyn Runner) -> Result<()> {
    let git = |args: &[&str]| Cmd::new("git").args(args).dir(&tree.path);

    git(&["init"]).run_with(runner)?;
    git(&["remote", "add", "origin", tree.url.as_str()]).run_with(runner)?;
    git(&["config", "core.sparseCheckout", "true"]).run_with(runner)?;

    let info = tree.path.join(".git/info");
    fs::create_dir_all(&info)
        .with_context(|| format!("Failed to create {}", info.display()))?;
    fs::write(info.join("sparse-checkout"), format!("{}/\n", subdir))
        .context("Failed to write sparse-checkout patterns")?;

    let depth = format!("--depth={}", FIRMWARE_DEPTH);
    git(&["pull", depth.as_str(), "origin", tree.branch.as_str()])
        .interactive()
        .error_msg(format!("git pull failed for {}", tree.url))
        .run_with(runner)?;
    Ok(())
}

/// Pull the remote branch and check out its head.
pub fn update(tree: &SourceTree, runner: &dyn Runner) -> Result<()> {
    tracing::info!(branch = %tree.branch, "Updating {} source", tree.kind);

    Cmd::new("git")
        .args(["pull", "origin", tree.branch.as_str()])
        .dir(&tree.path)
        .interactive()
        .error_msg(format!("git pull failed in {}", tree.path.display()))
        .run_with(runner)?;

    Cmd::new("git")
        .args(["checkout", tree.branch.as_str()])
        .dir(&tree.path)
        .error_msg(format!("git checkout {} failed", tree.branch))
        .run_with(runner)?;
    Ok(())
}
