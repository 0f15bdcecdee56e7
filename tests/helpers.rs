//! Shared test utilities for rpi-kbuild tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use rpi_kbuild::config::Config;
use rpi_kbuild::process::{Cmd, CommandResult, Runner};

pub const KERNEL_VERSION: &str = "4.1.21+";

/// What `make <platform>_defconfig` writes.
pub const DEFCONFIG: &str = "\
#
# Automatically generated file; DO NOT EDIT.
#
CONFIG_ARM=y
CONFIG_ARCH_BCM2708=y
# CONFIG_MODULES is not set
";

/// Test environment with temporary build root, output and config input.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    vars: HashMap<String, String>,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut vars = HashMap::new();
        vars.insert("BUILD_ROOT".to_string(), root.join("build").display().to_string());
        vars.insert("OUTPUT_DIR".to_string(), root.join("output").display().to_string());
        vars.insert(
            "KERNEL_CONFIG".to_string(),
            root.join("config/rpi-config").display().to_string(),
        );

        Self {
            _temp_dir: temp_dir,
            root,
            vars,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn config(&self) -> Config {
        Config::from_vars(&self.vars).expect("valid test config")
    }

    /// Mount an external kernel config.
    pub fn supply_config(&self, content: &str) -> PathBuf {
        let path = self.root.join("config/rpi-config");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}

/// Stands in for git, patch and make, producing the files they would.
pub struct Simulator {
    calls: RefCell<Vec<Cmd>>,
    applied: RefCell<HashSet<String>>,
    fail_on: Option<String>,
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            applied: RefCell::new(HashSet::new()),
            fail_on: None,
        }
    }

    /// Fail (exit 2) every command whose command line contains `needle`.
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Cmd::display).collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn simulate(&self, cmd: &Cmd) -> CommandResult {
        let args = cmd.get_args();
        let dir = cmd.current_dir().map(Path::to_path_buf);

        match (cmd.program(), args.first().map(String::as_str)) {
            ("git", Some("clone")) => {
                let dest = PathBuf::from(args.last().unwrap());
                fs::create_dir_all(dest.join(".git")).unwrap();
                match dest.file_name().and_then(|n| n.to_str()) {
                    Some("linux") => populate_kernel(&dest),
                    Some("aufs") => populate_aufs(&dest),
                    _ => {}
                }
            }
            ("git", Some("init")) => {
                fs::create_dir_all(dir.unwrap().join(".git")).unwrap();
            }
            ("git", Some("pull")) if args.iter().any(|a| a.starts_with("--depth")) => {
                populate_firmware(&dir.unwrap());
            }
            ("patch", _) => {
                let file = args.last().unwrap().clone();
                if cmd.has_arg("-R") {
                    let code = if self.applied.borrow().contains(&file) { 0 } else { 1 };
                    return CommandResult::exit(code);
                }
                self.applied.borrow_mut().insert(file);
            }
            ("make", _) => {
                let kernel = dir.unwrap();
                if args.iter().any(|a| a.ends_with("_defconfig")) {
                    fs::write(kernel.join(".config"), DEFCONFIG).unwrap();
                } else if cmd.has_arg("zImage") {
                    let image = kernel.join("arch/arm/boot/zImage");
                    fs::create_dir_all(image.parent().unwrap()).unwrap();
                    fs::write(image, b"\x00zImage-payload").unwrap();
                } else if cmd.has_arg("modules_install") {
                    let staging = args
                        .iter()
                        .find_map(|a| a.strip_prefix("INSTALL_MOD_PATH="))
                        .unwrap();
                    let module = Path::new(staging)
                        .join("lib/modules")
                        .join(KERNEL_VERSION)
                        .join("kernel/fs/aufs/aufs.ko");
                    fs::create_dir_all(module.parent().unwrap()).unwrap();
                    fs::write(module, b"\x7fELF").unwrap();
                }
            }
            _ => {}
        }
        CommandResult::ok()
    }
}

impl Runner for Simulator {
    fn execute(&self, cmd: &Cmd) -> anyhow::Result<CommandResult> {
        self.calls.borrow_mut().push(cmd.clone());
        if let Some(needle) = &self.fail_on {
            if cmd.display().contains(needle.as_str()) {
                return Ok(CommandResult::exit(2));
            }
        }
        Ok(self.simulate(cmd))
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Minimal kernel tree.
pub fn populate_kernel(dir: &Path) {
    write(&dir.join("Makefile"), "VERSION = 4\nPATCHLEVEL = 1\nSUBLEVEL = 21\n");
    write(
        &dir.join("include/uapi/linux/Kbuild"),
        "header-y += a.out.h\nheader-y += acct.h\n",
    );
    write(&dir.join("fs/Kconfig"), "menu \"File systems\"\n");
}

/// Minimal AUFS standalone tree with its patch series.
pub fn populate_aufs(dir: &Path) {
    write(&dir.join("fs/aufs/super.c"), "/* aufs */\n");
    write(&dir.join("fs/aufs/Kconfig"), "config AUFS_FS\n\ttristate \"Aufs\"\n");
    write(&dir.join("Documentation/filesystems/aufs/README"), "aufs\n");
    write(&dir.join("include/uapi/linux/aufs_type.h"), "#define AUFS_VERSION \"4.1\"\n");
    for name in rpi_kbuild::patch::AUFS_PATCHES {
        write(&dir.join(name), "--- a/fs/Kconfig\n+++ b/fs/Kconfig\n");
    }
}

/// Sparse `boot/` checkout of the firmware repository.
pub fn populate_firmware(dir: &Path) {
    let boot = dir.join("boot");
    for name in [
        "bcm2708-rpi-b.dtb",
        "bcm2709-rpi-2-b.dtb",
        "start.elf",
        "start_x.elf",
        "fixup.dat",
        "fixup_x.dat",
        "bootcode.bin",
        "LICENCE.broadcom",
    ] {
        write(&boot.join(name), name);
    }
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("Failed to read file: {}", path.display()));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists and is not empty.
pub fn assert_nonempty_file(path: &Path) {
    let meta = fs::metadata(path)
        .unwrap_or_else(|_| panic!("Expected file to exist: {}", path.display()));
    assert!(meta.len() > 0, "Expected non-empty file: {}", path.display());
}

/// Assert that a directory exists.
pub fn assert_dir_exists(path: &Path) {
    assert!(
        path.is_dir(),
        "Expected directory to exist: {}",
        path.display()
    );
}
