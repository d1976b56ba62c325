//! Compilation target and option types.
//!
//! These are plain data carried from the command line into the driver. The
//! enums derive [`clap::ValueEnum`] so the binary can parse them directly.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Target instruction-set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Arch {
    Amd64,
    Arm64,
    Riscv64,
}

impl Arch {
    /// Architecture of the machine running the compiler, if supported.
    pub fn host() -> Option<Arch> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::Amd64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Arch::Arm64)
        } else if cfg!(target_arch = "riscv64") {
            Some(Arch::Riscv64)
        } else {
            None
        }
    }

    /// GNU target triple used to pick a cross toolchain.
    pub fn triple(&self) -> &'static str {
        match self {
            Arch::Amd64 => "x86_64-linux-gnu",
            Arch::Arm64 => "aarch64-linux-gnu",
            Arch::Riscv64 => "riscv64-linux-gnu",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::Riscv64 => "riscv64",
        })
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" | "x86_64" | "x86-64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "riscv64" | "rv64" => Ok(Arch::Riscv64),
            other => Err(format!("unknown architecture: {}", other)),
        }
    }
}

/// Optimization level gating the pass pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OptLevel {
    O0,
    O1,
    #[default]
    O2,
    O3,
}

impl OptLevel {
    pub fn from_level(level: u8) -> Option<OptLevel> {
        match level {
            0 => Some(OptLevel::O0),
            1 => Some(OptLevel::O1),
            2 => Some(OptLevel::O2),
            3 => Some(OptLevel::O3),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            OptLevel::O0 => 0,
            OptLevel::O1 => 1,
            OptLevel::O2 => 2,
            OptLevel::O3 => 3,
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.level())
    }
}

impl FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim_start_matches(['O', 'o']);
        digits
            .parse::<u8>()
            .ok()
            .and_then(OptLevel::from_level)
            .ok_or_else(|| format!("invalid optimization level: {} (expected 0-3)", s))
    }
}

/// Options controlling one compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub arch: Arch,
    pub opt_level: OptLevel,
    /// Profile consumed by the PGO pass at `-O3`.
    pub profile: Option<PathBuf>,
    /// Worker threads for per-function compilation; 0 picks the CPU count.
    pub jobs: usize,
    /// Prefix for global symbols (`_` on Mach-O targets).
    pub symbol_prefix: String,
}

impl CompileOptions {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            opt_level: OptLevel::default(),
            profile: None,
            jobs: 0,
            symbol_prefix: default_symbol_prefix().to_string(),
        }
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_profile(mut self, profile: Option<PathBuf>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_symbol_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.symbol_prefix = prefix.into();
        self
    }

    /// Number of workers to spawn for `function_count` functions.
    pub fn worker_count(&self, function_count: usize) -> usize {
        let wanted = if self.jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.jobs
        };
        wanted.clamp(1, function_count.max(1))
    }
}

fn default_symbol_prefix() -> &'static str {
    if cfg!(target_os = "macos") {
        "_"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_parse_and_display() {
        assert_eq!("amd64".parse::<Arch>(), Ok(Arch::Amd64));
        assert_eq!("aarch64".parse::<Arch>(), Ok(Arch::Arm64));
        assert_eq!("riscv64".parse::<Arch>(), Ok(Arch::Riscv64));
        assert!("mips".parse::<Arch>().is_err());
        assert_eq!(Arch::Riscv64.to_string(), "riscv64");
    }

    #[test]
    fn test_opt_level_parse() {
        assert_eq!("0".parse::<OptLevel>(), Ok(OptLevel::O0));
        assert_eq!("O3".parse::<OptLevel>(), Ok(OptLevel::O3));
        assert!("4".parse::<OptLevel>().is_err());
        assert!(OptLevel::O1 < OptLevel::O2);
        assert_eq!(OptLevel::default(), OptLevel::O2);
    }

    #[test]
    fn test_worker_count_clamps() {
        let opts = CompileOptions::new(Arch::Amd64).with_jobs(8);
        assert_eq!(opts.worker_count(3), 3);
        assert_eq!(opts.worker_count(0), 1);
        let auto = CompileOptions::new(Arch::Amd64);
        assert!(auto.worker_count(100) >= 1);
    }
}
