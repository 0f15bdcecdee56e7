//! Configuration management for rpi-kbuild.
//!
//! Reads configuration from environment variables (a `.env` file is loaded
//! into the environment by `main` beforehand). The result is an immutable
//! [`Config`] built once at startup and handed to every stage.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default git URL for the Raspberry Pi kernel fork.
pub const DEFAULT_KERNEL_GIT_URL: &str = "https://github.com/raspberrypi/linux";
pub const DEFAULT_KERNEL_BRANCH: &str = "rpi-4.1.y";
/// Default git URL for the Raspberry Pi firmware repository.
pub const DEFAULT_FIRMWARE_GIT_URL: &str = "https://github.com/raspberrypi/firmware";
pub const DEFAULT_FIRMWARE_BRANCH: &str = "master";
/// Default git URL for the standalone AUFS patch set.
pub const DEFAULT_AUFS_GIT_URL: &str = "https://github.com/sfjro/aufs4-standalone";
pub const DEFAULT_AUFS_BRANCH: &str = "aufs4.1";

pub const DEFAULT_PARALLELISM: u32 = 3;
pub const DEFAULT_BUILD_ROOT: &str = "/build";
pub const DEFAULT_OUTPUT_DIR: &str = "/output";
pub const DEFAULT_KERNEL_CONFIG: &str = "/config/rpi-config";

pub const HARDFLOAT_PREFIX: &str = "arm-linux-gnueabihf-";
pub const SOFTFLOAT_PREFIX: &str = "arm-linux-gnueabi-";

/// Configuration errors that stop the program before any work starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PLATFORM '{0}': expected one of bcmrpi, bcm2709")]
    InvalidPlatform(String),
}

/// Target board family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// BCM2835 boards (Pi 1, Zero).
    Bcmrpi,
    /// BCM2836 boards (Pi 2).
    Bcm2709,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Bcmrpi => "bcmrpi",
            Platform::Bcm2709 => "bcm2709",
        }
    }

    /// The kernel's default config target for this board.
    pub fn defconfig(self) -> String {
        format!("{}_defconfig", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bcmrpi" => Ok(Platform::Bcmrpi),
            "bcm2709" => Ok(Platform::Bcm2709),
            other => Err(ConfigError::InvalidPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ARM floating point ABI of the cross toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatAbi {
    Hard,
    Soft,
}

impl FloatAbi {
    /// Toolchain binary prefix passed as `CROSS_COMPILE`.
    pub fn cross_compile(self) -> &'static str {
        match self {
            FloatAbi::Hard => HARDFLOAT_PREFIX,
            FloatAbi::Soft => SOFTFLOAT_PREFIX,
        }
    }
}

/// What happens after a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPolicy {
    /// Stop at the first failing stage.
    FailFast,
    /// Report and keep going; required stages still abort.
    Continue,
}

/// A git remote and the branch to build from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub url: String,
    pub branch: String,
}

/// Filesystem locations used by the pipeline.
#[derive(Debug, Clone)]
pub struct Paths {
    pub kernel_src: PathBuf,
    pub firmware_src: PathBuf,
    pub aufs_src: PathBuf,
    /// Output root.
    pub output: PathBuf,
    /// Optional externally supplied kernel `.config`.
    pub config_input: PathBuf,
}

impl Paths {
    /// Working trees under `build_root`, outputs under `output`.
    pub fn new(build_root: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let build_root = build_root.into();
        Self {
            kernel_src: build_root.join("linux"),
            firmware_src: build_root.join("firmware"),
            aufs_src: build_root.join("aufs"),
            output: output.into(),
            config_input: PathBuf::from(DEFAULT_KERNEL_CONFIG),
        }
    }

    pub fn kernel_out(&self) -> PathBuf {
        self.output.join("kernel")
    }

    pub fn modules_out(&self) -> PathBuf {
        self.output.join("modules")
    }

    pub fn firmware_out(&self) -> PathBuf {
        self.output.join("firmware")
    }

    /// The active config inside the kernel tree.
    pub fn kernel_config(&self) -> PathBuf {
        self.kernel_src.join(".config")
    }
}

/// rpi-kbuild configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Build AUFS as a module (AUFS_ENABLE).
    pub aufs_enable: bool,
    /// `make -j` degree (PARALLEL_OPT).
    pub parallelism: u32,
    /// Target board (PLATFORM).
    pub platform: Platform,
    /// Pull existing trees when reusing them (UPDATE_EXISTING).
    pub update_existing: bool,
    /// Reuse existing trees instead of cloning (USE_EXISTING_SRC).
    pub use_existing_src: bool,
    /// Toolchain ABI (USE_HARDFLOAT).
    pub float_abi: FloatAbi,
    /// Shallow clone depth for kernel and AUFS (GIT_DEPTH).
    pub git_depth: Option<u32>,
    pub fail_policy: FailPolicy,
    pub kernel: Remote,
    pub firmware: Remote,
    pub aufs: Remote,
    pub paths: Paths,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from a variable map, applying defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        // Set-but-empty counts as unset, like `${VAR:-default}`.
        let get = |key: &str, default: &str| -> String {
            match vars.get(key) {
                Some(value) if !value.is_empty() => value.clone(),
                _ => default.to_string(),
            }
        };
        let flag = |key: &str, default: &str| -> bool { get(key, default) == "YES" };

        let platform: Platform = get("PLATFORM", "bcmrpi").parse()?;

        let parallelism = match vars.get("PARALLEL_OPT").filter(|v| !v.is_empty()) {
            None => DEFAULT_PARALLELISM,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "PARALLEL_OPT is not a positive integer, using {}",
                        DEFAULT_PARALLELISM
                    );
                    DEFAULT_PARALLELISM
                }
            },
        };

        let git_depth = match vars.get("GIT_DEPTH").filter(|v| !v.is_empty()) {
            None => None,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    tracing::warn!(value = %raw, "GIT_DEPTH is not a positive integer, cloning full history");
                    None
                }
            },
        };

        let float_abi = if flag("USE_HARDFLOAT", "YES") {
            FloatAbi::Hard
        } else {
            FloatAbi::Soft
        };

        let fail_policy = if flag("KEEP_GOING", "NO") {
            FailPolicy::Continue
        } else {
            FailPolicy::FailFast
        };

        let mut paths = Paths::new(
            get("BUILD_ROOT", DEFAULT_BUILD_ROOT),
            get("OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
        );
        paths.config_input = PathBuf::from(get("KERNEL_CONFIG", DEFAULT_KERNEL_CONFIG));

        Ok(Self {
            aufs_enable: flag("AUFS_ENABLE", "YES"),
            parallelism,
            platform,
            update_existing: flag("UPDATE_EXISTING", "NO"),
            use_existing_src: flag("USE_EXISTING_SRC", "NO"),
            float_abi,
            git_depth,
            fail_policy,
            kernel: Remote {
                url: get("KERNEL_GIT_URL", DEFAULT_KERNEL_GIT_URL),
                branch: get("KERNEL_BRANCH", DEFAULT_KERNEL_BRANCH),
            },
            firmware: Remote {
                url: get("FIRMWARE_GIT_URL", DEFAULT_FIRMWARE_GIT_URL),
                branch: get("FIRMWARE_BRANCH", DEFAULT_FIRMWARE_BRANCH),
            },
            aufs: Remote {
                url: get("AUFS_GIT_URL", DEFAULT_AUFS_GIT_URL),
                branch: get("AUFS_BRANCH", DEFAULT_AUFS_BRANCH),
            },
            paths,
        })
    }

    /// Toolchain prefix handed to `make` as `CROSS_COMPILE`.
    pub fn cross_compile(&self) -> &'static str {
        self.float_abi.cross_compile()
    }

    /// Print the settings report.
    pub fn print(&self) {
        let yes_no = |b: bool| if b { "YES" } else { "NO" };
        println!("Configuration:");
        println!("  AUFS_ENABLE:      {}", yes_no(self.aufs_enable));
        println!("  PARALLEL_OPT:     {}", self.parallelism);
        println!("  PLATFORM:         {}", self.platform);
        println!("  UPDATE_EXISTING:  {}", yes_no(self.update_existing));
        println!("  USE_EXISTING_SRC: {}", yes_no(self.use_existing_src));
        println!(
            "  USE_HARDFLOAT:    {}",
            yes_no(self.float_abi == FloatAbi::Hard)
        );
        println!("  CROSS_COMPILE:    {}", self.cross_compile());
        println!(
            "  KEEP_GOING:       {}",
            yes_no(self.fail_policy == FailPolicy::Continue)
        );
        println!("Sources:");
        println!(
            "  kernel:   {} ({}) -> {}",
            self.kernel.url,
            self.kernel.branch,
            self.paths.kernel_src.display()
        );
        println!(
            "  firmware: {} ({}) -> {}",
            self.firmware.url,
            self.firmware.branch,
            self.paths.firmware_src.display()
        );
        println!(
            "  aufs:     {} ({}) -> {}",
            self.aufs.url,
            self.aufs.branch,
            self.paths.aufs_src.display()
        );
        match self.git_depth {
            Some(depth) => println!("  clone depth: {}", depth),
            None => println!("  clone depth: full"),
        }
        println!("Paths:");
        println!("  output:        {}", self.paths.output.display());
        if self.paths.config_input.is_file() {
            println!("  kernel config: {} (FOUND)", self.paths.config_input.display());
        } else {
            println!(
                "  kernel config: {} (not found, using {})",
                self.paths.config_input.display(),
                self.platform.defconfig()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert!(config.aufs_enable);
        assert_eq!(config.parallelism, 3);
        assert_eq!(config.platform, Platform::Bcmrpi);
        assert!(!config.update_existing);
        assert!(!config.use_existing_src);
        assert_eq!(config.float_abi, FloatAbi::Hard);
        assert_eq!(config.fail_policy, FailPolicy::FailFast);
        assert_eq!(config.git_depth, None);
        assert_eq!(config.paths.kernel_src, PathBuf::from("/build/linux"));
        assert_eq!(config.paths.kernel_out(), PathBuf::from("/output/kernel"));
        assert_eq!(config.kernel.branch, DEFAULT_KERNEL_BRANCH);
    }

    #[test]
    fn test_cross_compile_mapping() {
        let hard = Config::from_vars(&vars(&[("USE_HARDFLOAT", "YES")])).unwrap();
        assert_eq!(hard.cross_compile(), "arm-linux-gnueabihf-");

        for value in ["NO", "yes", "1", "true"] {
            let soft = Config::from_vars(&vars(&[("USE_HARDFLOAT", value)])).unwrap();
            assert_eq!(soft.cross_compile(), "arm-linux-gnueabi-", "value {:?}", value);
        }
    }

    #[test]
    fn test_flags_require_exact_yes() {
        let config = Config::from_vars(&vars(&[
            ("AUFS_ENABLE", "yes"),
            ("USE_EXISTING_SRC", "YES"),
            ("UPDATE_EXISTING", "Yes"),
            ("KEEP_GOING", "YES"),
        ]))
        .unwrap();
        assert!(!config.aufs_enable);
        assert!(config.use_existing_src);
        assert!(!config.update_existing);
        assert_eq!(config.fail_policy, FailPolicy::Continue);
    }

    #[test]
    fn test_platform_validation() {
        let config = Config::from_vars(&vars(&[("PLATFORM", "bcm2709")])).unwrap();
        assert_eq!(config.platform, Platform::Bcm2709);
        assert_eq!(config.platform.defconfig(), "bcm2709_defconfig");

        for bad in ["bcm2710", "BCMRPI", " ", "rpi"] {
            let err = Config::from_vars(&vars(&[("PLATFORM", bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidPlatform(ref p) if p == bad));
        }
    }

    #[test]
    fn test_empty_values_take_defaults() {
        let config = Config::from_vars(&vars(&[
            ("PLATFORM", ""),
            ("USE_HARDFLOAT", ""),
            ("AUFS_ENABLE", ""),
            ("PARALLEL_OPT", ""),
            ("KERNEL_BRANCH", ""),
            ("BUILD_ROOT", ""),
        ]))
        .unwrap();
        assert_eq!(config.platform, Platform::Bcmrpi);
        assert_eq!(config.float_abi, FloatAbi::Hard);
        assert!(config.aufs_enable);
        assert_eq!(config.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(config.kernel.branch, DEFAULT_KERNEL_BRANCH);
        assert_eq!(config.paths.kernel_src, PathBuf::from("/build/linux"));
    }

    #[test]
    fn test_parallelism_fallback() {
        let config = Config::from_vars(&vars(&[("PARALLEL_OPT", "8")])).unwrap();
        assert_eq!(config.parallelism, 8);

        for bad in ["0", "abc", "-2"] {
            let config = Config::from_vars(&vars(&[("PARALLEL_OPT", bad)])).unwrap();
            assert_eq!(config.parallelism, DEFAULT_PARALLELISM);
        }
    }

    #[test]
    fn test_path_and_remote_overrides() {
        let config = Config::from_vars(&vars(&[
            ("BUILD_ROOT", "/tmp/work"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("KERNEL_CONFIG", "/tmp/my.config"),
            ("KERNEL_BRANCH", "rpi-4.4.y"),
            ("GIT_DEPTH", "1"),
        ]))
        .unwrap();
        assert_eq!(config.paths.aufs_src, PathBuf::from("/tmp/work/aufs"));
        assert_eq!(config.paths.firmware_out(), PathBuf::from("/tmp/out/firmware"));
        assert_eq!(config.paths.config_input, PathBuf::from("/tmp/my.config"));
        assert_eq!(config.kernel.branch, "rpi-4.4.y");
        assert_eq!(config.git_depth, Some(1));
    }
}
