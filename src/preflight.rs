//! Preflight checks for a kernel build.
//!
//! Validates host tools and paths before starting a build.
//! Run with `rpi-kbuild preflight` to check everything is ready.

use std::path::Path;

use crate::config::Config;
use crate::process;
use crate::sources;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    pub fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Count of failed checks.
    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    /// Count of warnings.
    pub fn warn_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status_str) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let total = self.checks.len();
        let passed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count();
        let failed = self.fail_count();
        let warned = self.warn_count();

        println!("Summary: {}/{} passed", passed, total);
        if failed > 0 {
            println!("         {} FAILED - build will not succeed", failed);
        }
        if warned > 0 {
            println!("         {} warnings", warned);
        }
    }
}

/// Host programs the pipeline shells out to.
pub fn required_tools(config: &Config) -> Vec<String> {
    let mut tools = vec!["git".to_string(), "make".to_string()];
    if config.aufs_enable {
        tools.push("patch".to_string());
    }
    tools.push(format!("{}gcc", config.cross_compile()));
    tools
}

/// Run all checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    for tool in required_tools(config) {
        match process::which(&tool) {
            Some(path) => checks.push(CheckResult::pass_with(&tool, &path.display().to_string())),
            None => checks.push(CheckResult::fail(&tool, "Not found in PATH")),
        }
    }

    checks.push(check_writable("Build root", parent_or_self(&config.paths.kernel_src)));
    checks.push(check_writable("Output directory", &config.paths.output));

    if config.paths.config_input.is_file() {
        checks.push(CheckResult::pass_with(
            "Kernel config",
            &format!("{} will be used", config.paths.config_input.display()),
        ));
    } else {
        checks.push(CheckResult::warn(
            "Kernel config",
            &format!(
                "{} not found - {} will be generated",
                config.paths.config_input.display(),
                config.platform.defconfig()
            ),
        ));
    }

    if config.use_existing_src {
        let trees = sources::trees(config);
        let missing: Vec<String> = trees
            .iter()
            .filter(|t| !t.is_present())
            .map(|t| t.kind.to_string())
            .collect();
        if missing.is_empty() {
            checks.push(CheckResult::pass_with("Existing sources", "All trees present"));
        } else {
            checks.push(CheckResult::warn(
                "Existing sources",
                &format!("Missing {} - all trees will be cloned fresh", missing.join(", ")),
            ));
        }
    }

    PreflightReport { checks }
}

fn parent_or_self(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

/// Passes if a file can be created in `dir` (or its nearest existing
/// ancestor) by the current user.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    let Some(existing) = dir.ancestors().find(|p| p.exists()) else {
        return CheckResult::fail(name, &format!("{} has no existing ancestor", dir.display()));
    };
    if !existing.is_dir() {
        return CheckResult::fail(
            name,
            &format!("{} exists and is not a directory", existing.display()),
        );
    }
    match tempfile::tempfile_in(existing) {
        Ok(_) => CheckResult::pass_with(name, &dir.display().to_string()),
        Err(e) => CheckResult::fail(name, &format!("{} is not writable: {}", existing.display(), e)),
    }
}
