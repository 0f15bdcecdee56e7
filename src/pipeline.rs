//! The build pipeline: stages run in a fixed order with checked results.
//!
//! Under [`FailPolicy::FailFast`] the first failure stops the run. Under
//! [`FailPolicy::Continue`] failures are recorded and later stages still run,
//! except after a required stage fails.

use anyhow::{Context, Result};
use std::fmt;
use std::time::Duration;

use crate::artifacts;
use crate::config::{Config, FailPolicy};
use crate::kconfig;
use crate::kernel;
use crate::patch;
use crate::process::Runner;
use crate::sources;
use crate::timing::{Elapsed, Timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    Patch,
    Configure,
    Compile,
    InstallModules,
    Collect,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Acquire,
        Stage::Patch,
        Stage::Configure,
        Stage::Compile,
        Stage::InstallModules,
        Stage::Collect,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Acquire => "Source acquisition",
            Stage::Patch => "AUFS patching",
            Stage::Configure => "Kernel config",
            Stage::Compile => "Kernel compile",
            Stage::InstallModules => "Module install",
            Stage::Collect => "Artifact collection",
        }
    }

    /// A failure here aborts the run under every policy.
    pub fn required(self) -> bool {
        matches!(self, Stage::Patch | Stage::Configure)
    }

    /// Run the stage. `Ok(false)` means it had nothing to do.
    fn run(self, config: &Config, runner: &dyn Runner) -> Result<bool> {
        match self {
            Stage::Acquire => {
                sources::acquire(config, runner)?;
            }
            Stage::Patch => {
                if !config.aufs_enable {
                    return Ok(false);
                }
                patch::apply_aufs(config, runner)?;
            }
            Stage::Configure => {
                kconfig::materialize(config, runner)?;
            }
            Stage::Compile => kernel::compile(config, runner)?,
            Stage::InstallModules => {
                kernel::install_modules(config, runner)?;
            }
            Stage::Collect => {
                artifacts::collect(config)?;
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Done,
    Skipped,
    Failed(String),
    /// Not reached because an earlier stage stopped the run.
    NotRun,
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub elapsed: Duration,
}

/// Per-stage results of one run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub outcomes: Vec<StageOutcome>,
}

impl BuildReport {
    pub fn failed(&self) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StageStatus::Failed(_)))
    }

    pub fn status_of(&self, stage: Stage) -> Option<&StageStatus> {
        self.outcomes
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| &o.status)
    }

    pub fn print(&self) {
        println!("\n=== Build Report ===\n");
        for outcome in &self.outcomes {
            let (icon, status) = match &outcome.status {
                StageStatus::Done => ("✓", "DONE"),
                StageStatus::Skipped => ("○", "SKIP"),
                StageStatus::Failed(_) => ("✗", "FAIL"),
                StageStatus::NotRun => ("-", "----"),
            };
            print!("  {} [{}] {}", icon, status, outcome.stage);
            match &outcome.status {
                StageStatus::Done | StageStatus::Skipped => {
                    println!(" ({})", Elapsed(outcome.elapsed))
                }
                StageStatus::Failed(msg) => println!(": {}", msg),
                StageStatus::NotRun => println!(),
            }
        }
        let failed = self.failed().count();
        println!();
        if failed == 0 {
            println!("Build complete.");
        } else {
            println!("{} stage(s) FAILED", failed);
        }
    }
}

/// Runs the stages against one immutable config.
pub struct Pipeline<'a> {
    config: &'a Config,
    runner: &'a dyn Runner,
    policy: FailPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn Runner) -> Self {
        Self {
            config,
            runner,
            policy: config.fail_policy,
        }
    }

    pub fn with_policy(mut self, policy: FailPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run all stages. Returns the report together with the last failure.
    pub fn run(&self) -> (BuildReport, Result<()>) {
        self.run_stages(&Stage::ALL)
    }

    pub fn run_stages(&self, stages: &[Stage]) -> (BuildReport, Result<()>) {
        let mut report = BuildReport::default();
        let mut last_error: Option<anyhow::Error> = None;
        let mut stopped = false;

        for &stage in stages {
            if stopped {
                report.outcomes.push(StageOutcome {
                    stage,
                    status: StageStatus::NotRun,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            println!("\n[{}]", stage);
            let timer = Timer::start();
            let result = stage.run(self.config, self.runner);
            let elapsed = timer.finish();

            let status = match result {
                Ok(true) => {
                    tracing::info!(stage = stage.name(), elapsed = %Elapsed(elapsed), "stage done");
                    StageStatus::Done
                }
                Ok(false) => {
                    tracing::info!(stage = stage.name(), "stage skipped");
                    StageStatus::Skipped
                }
                Err(e) => {
                    let msg = format!("{:#}", e);
                    tracing::error!(stage = stage.name(), "{}", msg);
                    if self.policy == FailPolicy::FailFast || stage.required() {
                        stopped = true;
                    }
                    last_error = Some(e.context(format!("{} failed", stage)));
                    StageStatus::Failed(msg)
                }
            };
            report.outcomes.push(StageOutcome {
                stage,
                status,
                elapsed,
            });
        }

        let result = match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        };
        (report, result)
    }
}

/// Run the full pipeline and print the report.
pub fn build(config: &Config, runner: &dyn Runner) -> Result<BuildReport> {
    let (report, result) = Pipeline::new(config, runner).run();
    report.print();
    result.context("Build failed")?;
    Ok(report)
}
