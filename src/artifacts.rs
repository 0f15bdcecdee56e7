//! Collection of build outputs into the output tree.
//!
//! Layout:
//! - `kernel/kernel.img`, `kernel/rpi-config`
//! - `modules/lib/modules/<version>/...` (written by `modules_install`)
//! - `firmware/*.dtb`, `start*.elf`, `fixup*.dat`, `bootcode.bin`
//! - `manifest.json`

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::kernel;
use crate::sources::FIRMWARE_SUBDIR;

pub const KERNEL_IMG: &str = "kernel.img";
pub const CONFIG_COPY: &str = "rpi-config";
pub const MANIFEST: &str = "manifest.json";

/// Firmware blob families copied from the firmware tree's `boot/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirmwareKind {
    DeviceTree,
    GpuFirmware,
    GpuFixup,
    Bootloader,
}

impl FirmwareKind {
    pub const ALL: [FirmwareKind; 4] = [
        FirmwareKind::DeviceTree,
        FirmwareKind::GpuFirmware,
        FirmwareKind::GpuFixup,
        FirmwareKind::Bootloader,
    ];

    /// Does `name` belong to this family?
    pub fn matches(self, name: &str) -> bool {
        match self {
            FirmwareKind::DeviceTree => name.ends_with(".dtb"),
            FirmwareKind::GpuFirmware => name.starts_with("start") && name.ends_with(".elf"),
            FirmwareKind::GpuFixup => name.starts_with("fixup") && name.ends_with(".dat"),
            FirmwareKind::Bootloader => name == "bootcode.bin",
        }
    }

    pub fn classify(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.matches(name))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    /// Relative to the output root.
    pub path: String,
    pub size: u64,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwareKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub platform: String,
    pub cross_compile: String,
    pub aufs: bool,
    pub modules: usize,
    pub files: Vec<ManifestEntry>,
    /// Everything `modules_install` staged, `.ko` files and depmod output.
    pub module_files: Vec<ManifestEntry>,
}

/// Copy kernel image, firmware and final config into the output tree.
///
/// The three copy groups are independent: a missing kernel image does not
/// keep firmware or config from being collected. The manifest is written
/// for whatever was copied, then the first failure is returned.
pub fn collect(config: &Config) -> Result<Manifest> {
    let paths = &config.paths;
    let kernel_out = paths.kernel_out();
    let modules_out = paths.modules_out();
    let firmware_out = paths.firmware_out();

    for dir in [&kernel_out, &modules_out, &firmware_out] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut copied: Vec<(PathBuf, Option<FirmwareKind>)> = Vec::new();

    let results = [
        ("kernel image", collect_image(config, &kernel_out, &mut copied)),
        ("firmware", collect_firmware(config, &firmware_out, &mut copied)),
        ("kernel config", collect_config(config, &kernel_out, &mut copied)),
    ];
    let mut errors: Vec<anyhow::Error> = Vec::new();
    for (group, result) in results {
        if let Err(e) = result {
            tracing::warn!(group, "{:#}", e);
            errors.push(e);
        }
    }

    let mut files = Vec::with_capacity(copied.len());
    for (path, firmware) in copied {
        files.push(describe(&paths.output, &path, firmware)?);
    }
    let mut module_files = Vec::new();
    for entry in WalkDir::new(&modules_out).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", modules_out.display()))?;
        if entry.file_type().is_file() {
            module_files.push(describe(&paths.output, entry.path(), None)?);
        }
    }

    let manifest = Manifest {
        platform: config.platform.to_string(),
        cross_compile: config.cross_compile().to_string(),
        aufs: config.aufs_enable,
        modules: crate::fsutil::count_files(&modules_out, &[".ko"]),
        files,
        module_files,
    };

    let manifest_path = paths.output.join(MANIFEST);
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    match errors.into_iter().next() {
        Some(first) => Err(first),
        None => Ok(manifest),
    }
}

fn collect_image(
    config: &Config,
    kernel_out: &Path,
    copied: &mut Vec<(PathBuf, Option<FirmwareKind>)>,
) -> Result<()> {
    let image = kernel::image_path(config);
    if !image.is_file() {
        bail!(
            "Kernel image not found at {}\nThe compile stage did not produce it.",
            image.display()
        );
    }
    let dest = kernel_out.join(KERNEL_IMG);
    copy_file(&image, &dest)?;
    println!("  Copied {}", KERNEL_IMG);
    copied.push((dest, None));
    Ok(())
}

fn collect_firmware(
    config: &Config,
    firmware_out: &Path,
    copied: &mut Vec<(PathBuf, Option<FirmwareKind>)>,
) -> Result<()> {
    let firmware_src = config.paths.firmware_src.join(FIRMWARE_SUBDIR);
    let entries = fs::read_dir(&firmware_src)
        .with_context(|| format!("Firmware directory missing: {}", firmware_src.display()))?;
    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut found = [0usize; 4];
    for name in names {
        let Some(kind) = FirmwareKind::classify(&name) else {
            continue;
        };
        let dest = firmware_out.join(&name);
        copy_file(&firmware_src.join(&name), &dest)?;
        found[kind as usize] += 1;
        copied.push((dest, Some(kind)));
    }
    for (kind, count) in FirmwareKind::ALL.iter().zip(found) {
        if count == 0 {
            tracing::warn!(kind = ?kind, "No firmware files of this kind in {}", firmware_src.display());
        }
    }
    println!("  Copied {} firmware files", found.iter().sum::<usize>());
    Ok(())
}

fn collect_config(
    config: &Config,
    kernel_out: &Path,
    copied: &mut Vec<(PathBuf, Option<FirmwareKind>)>,
) -> Result<()> {
    let dest = kernel_out.join(CONFIG_COPY);
    copy_file(&config.paths.kernel_config(), &dest)?;
    println!("  Copied {}", CONFIG_COPY);
    copied.push((dest, None));
    Ok(())
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

fn describe(root: &Path, path: &Path, firmware: Option<FirmwareKind>) -> Result<ManifestEntry> {
    let (size, sha256) = sha256_file(path)?;
    Ok(ManifestEntry {
        path: path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned(),
        size,
        sha256,
        firmware,
    })
}

/// Size and hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<(u64, String)> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((size, format!("{:x}", hasher.finalize())))
}
