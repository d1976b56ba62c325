//! Assembling and linking through the platform C toolchain.
//!
//! The emitted module is written next to the output as `<output>.s`,
//! assembled into `<output>.o` and linked with the runtime. A runtime given
//! as C source is compiled first; archives and objects are passed through.
//! Intermediates are removed afterwards unless they are kept.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::{Arch, CompileError, CompileResult};

/// Environment variable naming the C compiler driver to use.
pub const CC_ENV: &str = "TYPTHON_CC";

#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub arch: Arch,
    pub output: PathBuf,
    /// Runtime as C source, object or archive.
    pub runtime: Option<PathBuf>,
    pub keep_temps: bool,
    pub static_link: bool,
}

impl LinkOptions {
    pub fn new(arch: Arch, output: impl Into<PathBuf>) -> Self {
        Self {
            arch,
            output: output.into(),
            runtime: None,
            keep_temps: false,
            static_link: true,
        }
    }

    pub fn with_runtime(mut self, runtime: Option<PathBuf>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_keep_temps(mut self, keep: bool) -> Self {
        self.keep_temps = keep;
        self
    }
}

/// Compiler driver for `arch`: the override if one is set, `cc` for the
/// host and the GNU cross driver otherwise.
pub fn select_driver(arch: Arch, host: Option<Arch>, override_cc: Option<&str>) -> String {
    if let Some(cc) = override_cc.map(str::trim).filter(|cc| !cc.is_empty()) {
        return cc.to_string();
    }
    if host == Some(arch) {
        "cc".to_string()
    } else {
        format!("{}-gcc", arch.triple())
    }
}

pub struct Linker {
    driver: String,
    options: LinkOptions,
}

impl Linker {
    /// Linker using the driver chosen from the environment.
    pub fn new(options: LinkOptions) -> Self {
        let override_cc = env::var(CC_ENV).ok();
        let driver = select_driver(options.arch, Arch::host(), override_cc.as_deref());
        Self::with_driver(options, driver)
    }

    pub fn with_driver(options: LinkOptions, driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            options,
        }
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    fn temp_path(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self.options.output.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Assemble `assembly` and link it with the runtime into the output.
    pub fn link_assembly(&self, assembly: &str) -> CompileResult<PathBuf> {
        let mut temps = Vec::new();
        let result = self.assemble_and_link(assembly, &mut temps);
        if self.options.keep_temps {
            log::info!("Keeping intermediates: {:?}", temps);
        } else {
            remove_files(&temps);
        }
        result.map(|()| self.options.output.clone())
    }

    fn assemble_and_link(&self, assembly: &str, temps: &mut Vec<PathBuf>) -> CompileResult<()> {
        let asm_path = self.temp_path(".s");
        let obj_path = self.temp_path(".o");
        temps.push(asm_path.clone());
        fs::write(&asm_path, assembly)?;
        temps.push(obj_path.clone());
        self.run(&[
            OsStr::new("-c"),
            OsStr::new("-o"),
            obj_path.as_os_str(),
            asm_path.as_os_str(),
        ])?;

        let runtime = match &self.options.runtime {
            Some(path) if path.extension().is_some_and(|ext| ext == "c") => {
                let runtime_obj = self.temp_path(".runtime.o");
                temps.push(runtime_obj.clone());
                self.run(&[
                    OsStr::new("-c"),
                    OsStr::new("-O2"),
                    OsStr::new("-o"),
                    runtime_obj.as_os_str(),
                    path.as_os_str(),
                ])?;
                Some(runtime_obj)
            }
            Some(path) => Some(path.clone()),
            None => None,
        };

        let mut args: Vec<&OsStr> = Vec::new();
        if self.options.static_link {
            args.push(OsStr::new("-static"));
        }
        args.push(OsStr::new("-o"));
        args.push(self.options.output.as_os_str());
        args.push(obj_path.as_os_str());
        if let Some(runtime) = &runtime {
            args.push(runtime.as_os_str());
        }
        self.run(&args)
    }

    fn run(&self, args: &[&OsStr]) -> CompileResult<()> {
        let command_line = std::iter::once(self.driver.as_str().to_string())
            .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        log::debug!("Running {}", command_line);

        let output = Command::new(&self.driver)
            .args(args)
            .output()
            .map_err(|err| CompileError::Link {
                command: command_line.clone(),
                status: "not started".to_string(),
                stderr: err.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CompileError::Link {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if path.exists() {
            if let Err(err) = fs::remove_file(path) {
                log::warn!("Could not remove {}: {}", path.display(), err);
            }
        }
    }
}

/// Write assembly text to `path` without linking.
pub fn write_assembly(path: &Path, assembly: &str) -> CompileResult<()> {
    fs::write(path, assembly)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_selection() {
        assert_eq!(select_driver(Arch::Amd64, Some(Arch::Amd64), None), "cc");
        assert_eq!(
            select_driver(Arch::Riscv64, Some(Arch::Amd64), None),
            "riscv64-linux-gnu-gcc"
        );
        assert_eq!(
            select_driver(Arch::Arm64, None, None),
            "aarch64-linux-gnu-gcc"
        );
        assert_eq!(select_driver(Arch::Arm64, Some(Arch::Amd64), Some("clang")), "clang");
        assert_eq!(select_driver(Arch::Amd64, Some(Arch::Amd64), Some("  ")), "cc");
    }

    #[test]
    fn test_missing_driver_reports_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("prog");
        let linker = Linker::with_driver(
            LinkOptions::new(Arch::Amd64, &output),
            "typthon-no-such-compiler",
        );
        let err = linker.link_assembly("    .text\n").unwrap_err();
        match err {
            CompileError::Link { command, status, .. } => {
                assert!(command.starts_with("typthon-no-such-compiler -c -o"));
                assert_eq!(status, "not started");
            }
            other => panic!("unexpected error {}", other),
        }
        assert!(!dir.path().join("prog.s").exists());
        assert!(!output.exists());
    }

    #[test]
    fn test_keep_temps_leaves_assembly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("prog");
        let linker = Linker::with_driver(
            LinkOptions::new(Arch::Amd64, &output).with_keep_temps(true),
            "typthon-no-such-compiler",
        );
        assert!(linker.link_assembly("    .text\n").is_err());
        let kept = fs::read_to_string(dir.path().join("prog.s")).expect("kept assembly");
        assert_eq!(kept, "    .text\n");
    }

    #[test]
    fn test_write_assembly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.s");
        write_assembly(&path, "    .text\n").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "    .text\n");
    }
}
