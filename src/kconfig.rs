//! Kernel `.config` materialization.
//!
//! The config is loaded from an external file if one is mounted, generated
//! from the board defconfig if none exists, or reconciled with
//! `olddefconfig` otherwise. A couple of symbols are then forced on.
//!
//! Symbol edits go through [`KernelConfig`], a line-preserving parse of the
//! file, so a symbol is never written twice and a `# CONFIG_X is not set`
//! line is replaced rather than shadowed.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::kernel::make;
use crate::process::Runner;

/// Value a forced symbol must end up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tristate {
    Yes,
    Module,
}

impl Tristate {
    pub fn as_str(self) -> &'static str {
        match self {
            Tristate::Yes => "y",
            Tristate::Module => "m",
        }
    }

    /// `m` is satisfied by built-in `y` as well.
    fn satisfied_by(self, value: &str) -> bool {
        match self {
            Tristate::Yes => value == "y",
            Tristate::Module => value == "y" || value == "m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Set { key: String, value: String },
    Unset { key: String },
    Other(String),
}

impl Line {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("# ") {
            if let Some(key) = rest.strip_suffix(" is not set") {
                if key.starts_with("CONFIG_") && !key.contains(' ') {
                    return Line::Unset {
                        key: key.to_string(),
                    };
                }
            }
        } else if trimmed.starts_with("CONFIG_") {
            if let Some((key, value)) = trimmed.split_once('=') {
                return Line::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                };
            }
        }
        Line::Other(raw.to_string())
    }

    fn key(&self) -> Option<&str> {
        match self {
            Line::Set { key, .. } | Line::Unset { key } => Some(key),
            Line::Other(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Line::Set { key, value } => format!("{}={}", key, value),
            Line::Unset { key } => format!("# {} is not set", key),
            Line::Other(raw) => raw.clone(),
        }
    }
}

/// What [`KernelConfig::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    Added,
    Replaced,
}

/// A parsed kernel `.config`.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    lines: Vec<Line>,
}

impl KernelConfig {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(Line::parse).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read kernel config at {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write kernel config at {}", path.display()))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }

    /// Value of `key`, or `None` if absent or unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            Line::Set { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set `key=value` in place of any existing entry for `key`.
    pub fn set(&mut self, key: &str, value: &str) -> Change {
        let new = Line::Set {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.lines.iter().position(|l| l.key() == Some(key)) {
            Some(idx) => {
                self.lines[idx] = new;
                // Drop later duplicates so the key appears once.
                let mut seen = 0;
                self.lines.retain(|l| {
                    if l.key() == Some(key) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
                Change::Replaced
            }
            None => {
                self.lines.push(new);
                Change::Added
            }
        }
    }

    /// Make sure `key` is enabled at least as `want`.
    pub fn ensure(&mut self, key: &str, want: Tristate) -> Change {
        match self.get(key) {
            Some(value) if want.satisfied_by(value) => Change::Unchanged,
            _ => self.set(key, want.as_str()),
        }
    }
}

/// Symbols forced on after the config is materialized.
pub fn forced_symbols(config: &Config) -> Vec<(&'static str, Tristate)> {
    let mut symbols = vec![("CONFIG_MODULES", Tristate::Yes)];
    if config.aufs_enable {
        symbols.push(("CONFIG_AUFS_FS", Tristate::Module));
    }
    symbols
}

/// How the base config was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Generated from `<platform>_defconfig`.
    Defconfig,
    /// An existing config (supplied or left over) reconciled with `olddefconfig`.
    Reconciled,
}

/// Produce the kernel tree's final `.config`.
pub fn materialize(config: &Config, runner: &dyn Runner) -> Result<ConfigSource> {
    let paths = &config.paths;
    let dot_config = paths.kernel_config();

    if paths.config_input.is_file() {
        println!("  Using supplied config {}", paths.config_input.display());
        fs::copy(&paths.config_input, &dot_config).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                paths.config_input.display(),
                dot_config.display()
            )
        })?;
    }

    let source = if dot_config.exists() {
        println!("  Reconciling existing config with olddefconfig...");
        make(config)
            .arg("olddefconfig")
            .error_msg("make olddefconfig failed")
            .run_with(runner)?;
        ConfigSource::Reconciled
    } else {
        let target = config.platform.defconfig();
        println!("  Generating config from {}...", target);
        make(config)
            .arg(&target)
            .error_msg(format!("make {} failed", target))
            .run_with(runner)?;
        ConfigSource::Defconfig
    };

    let symbols = forced_symbols(config);
    let mut kconfig = KernelConfig::load(&dot_config)?;
    let mut changed = false;
    for (key, want) in &symbols {
        let change = kconfig.ensure(key, *want);
        if change != Change::Unchanged {
            println!("  Forced {}={}", key, want.as_str());
            changed = true;
        }
    }

    if changed {
        kconfig.save(&dot_config)?;
        // Resolve symbols the forced ones expose, without prompting.
        make(config)
            .arg("olddefconfig")
            .error_msg("make olddefconfig failed")
            .run_with(runner)?;

        let resolved = KernelConfig::load(&dot_config)?;
        for (key, want) in &symbols {
            if !resolved.get(key).is_some_and(|v| want.satisfied_by(v)) {
                tracing::warn!("{} was dropped by the kernel's dependency rules", key);
            }
        }
    }

    Ok(source)
}
